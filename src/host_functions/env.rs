//! Process information for guest code.
//!
//! Constants are copied into the namespace object once per context; `getcwd`
//! is a flat table function.

use super::HostResult;
use crate::error::error_codes;
use crate::guest::{GuestEngine, GuestRef, GuestValue, ObjectClass};

/// Error code constants exported next to the functions
const ERROR_CONSTANTS: [(&str, i32); 5] = [
    ("EPERM", error_codes::PERMISSION_DENIED),
    ("ENOENT", error_codes::NOT_FOUND),
    ("EINVAL", error_codes::INVALID_ARGUMENT),
    ("EIO", error_codes::IO_ERROR),
    ("EINTERNAL", error_codes::INTERNAL_ERROR),
];

/// Current working directory
///
/// # Returns
/// * `Ok(path)` - The directory as a string
/// * `Err(code)` - If the directory is gone or unreadable
pub fn getcwd(_engine: &mut GuestEngine, _args: &[GuestValue]) -> HostResult<GuestValue> {
    let cwd = std::env::current_dir().map_err(|e| error_codes::from_io(&e))?;
    Ok(GuestValue::String(cwd.to_string_lossy().into_owned()))
}

/// Copy the process constants and the environment into `binding`.
pub(crate) fn install(engine: &mut GuestEngine, binding: GuestRef, global: GuestRef) {
    engine.set_own(binding, "version".into(), crate::VERSION.into());
    engine.set_own(binding, "pid".into(), GuestValue::Number(std::process::id() as f64));
    engine.set_own(binding, "arch".into(), std::env::consts::ARCH.into());
    engine.set_own(binding, "platform".into(), std::env::consts::OS.into());

    for (name, code) in ERROR_CONSTANTS {
        engine.set_own(binding, name.into(), GuestValue::Number(code as f64));
    }

    let env = engine.allocate_in(ObjectClass::Plain, Some(global));
    for (key, value) in std::env::vars_os() {
        // Entries that are not valid UTF-8 are skipped
        if let (Ok(key), Ok(value)) = (key.into_string(), value.into_string()) {
            engine.set_own(env, key.into(), value.into());
        }
    }
    engine.set_own(binding, "env".into(), GuestValue::Object(env));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_getcwd() {
        let mut engine = GuestEngine::new();
        let cwd = getcwd(&mut engine, &[]).unwrap();
        let expected = std::env::current_dir().unwrap();
        assert_eq!(cwd.as_str(), Some(expected.to_string_lossy().as_ref()));
    }

    #[test]
    fn test_install_constants() {
        let mut engine = GuestEngine::new();
        let global = engine.new_context(false);
        let binding = engine.new_object();
        install(&mut engine, binding, global);

        assert_eq!(
            engine.get_own(binding, &"platform".into()),
            GuestValue::from(std::env::consts::OS)
        );
        assert_eq!(
            engine.get_own(binding, &"ENOENT".into()),
            GuestValue::Number(-2.0)
        );
        let env = engine.get_own(binding, &"env".into()).as_object().unwrap();
        if let Ok(path) = std::env::var("PATH") {
            assert_eq!(engine.get_own(env, &"PATH".into()), GuestValue::from(path));
        }
    }
}
