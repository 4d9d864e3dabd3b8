use std::sync::Arc;

use tokio::sync::Mutex;

use interlock_core::config::Config;
use interlock_core::sandbox::Sandbox;
use interlock_core::status::StatusLog;
use interlock_crypto::CipherRegistry;
use interlock_hsm::Hsm;
use interlock_volume::VolumeManager;

use crate::logging::LogSwitch;
use crate::session::Session;
use crate::tickets::TicketCache;

/// Process-wide state shared across request handlers.
///
/// The configuration, cipher registry and role assignment are frozen at
/// startup; the session, status registry and ticket cache each guard their
/// mutable state behind their own lock so unrelated requests never
/// serialize on a shared one.
pub struct AppState {
    pub config: Config,
    pub registry: CipherRegistry,
    pub sandbox: Sandbox,
    pub status: Arc<StatusLog>,
    pub session: Mutex<Session>,
    pub tickets: TicketCache,
    pub volume: Arc<VolumeManager>,
    pub hsm_tls: Option<Arc<Hsm>>,
    pub logs: LogSwitch,
    pub started: std::time::Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        registry: CipherRegistry,
        status: Arc<StatusLog>,
        volume: VolumeManager,
        hsm_tls: Option<Arc<Hsm>>,
        logs: LogSwitch,
    ) -> SharedState {
        let sandbox = Sandbox::new(config.mount_point.clone(), config.key_path.clone());

        Arc::new(Self {
            config,
            registry,
            sandbox,
            status,
            session: Mutex::new(Session::default()),
            tickets: TicketCache::new(),
            volume: Arc::new(volume),
            hsm_tls,
            logs,
            started: std::time::Instant::now(),
        })
    }
}
