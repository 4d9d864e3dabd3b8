//! One-shot operator mode (`-o <op>`): volume unlock/lock and HSM key
//! derivation from the command line, without starting the server.

use interlock_core::{Error, Result};
use interlock_volume::VolumeManager;

pub fn run(op: &str, volume: &VolumeManager) -> Result<()> {
    let invalid = || Error::BadRequest("invalid operation".into());

    // ^(open|close|derive)(:.+)?$
    let (cmd, arg) = match op.split_once(':') {
        Some((_, "")) => return Err(invalid()),
        Some((cmd, arg)) => (cmd, Some(arg)),
        None => (op, None),
    };

    match (cmd, arg) {
        ("open", Some(name)) => {
            let password = prompt_password(false)?;
            volume.unlock(name, &password)
        }
        ("open", None) => Err(invalid()),
        ("close", None) => volume.lock(),
        ("derive", arg) => {
            let secret = match arg {
                Some(hex_data) => hex::decode(hex_data)
                    .map_err(|e| Error::BadRequest(format!("invalid hex data: {e}")))?,
                None => prompt_password(true)?.into_bytes(),
            };

            let derived = volume.derive_raw(&secret)?;
            println!("{derived}");

            Ok(())
        }
        _ => Err(invalid()),
    }
}

fn prompt_password(confirm: bool) -> Result<String> {
    let password = rpassword::prompt_password("Password: ")
        .map_err(|e| Error::Other(format!("cannot read password: {e}")))?;

    if confirm {
        let confirmation = rpassword::prompt_password("Confirm password: ")
            .map_err(|e| Error::Other(format!("cannot read password: {e}")))?;

        if password != confirmation {
            return Err(Error::BadRequest("password mismatch".into()));
        }
    }

    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;
    use interlock_core::status::StatusLog;

    fn manager() -> VolumeManager {
        VolumeManager::new("lvmvolume", "/tmp/interlock-op-test", StatusLog::new(), None)
    }

    #[test]
    fn test_malformed_operations_rejected() {
        let volume = manager();

        for op in ["open", "open:", "derive:", "poweroff", "close:now"] {
            assert!(run(op, &volume).is_err(), "operation {op} must be rejected");
        }
    }

    #[test]
    fn test_derive_without_hsm_fails() {
        let volume = manager();
        let err = run("derive:deadbeef", &volume).unwrap_err();
        assert!(err.to_string().contains("HSM is required"));
    }
}
