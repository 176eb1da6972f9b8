//! The `DBUS_COOKIE_SHA1` keyring: `~/.dbus-keyrings/<context>`.
//!
//! Updates go through lockfile-and-rename: a `<ctx>.lock` file created with
//! `O_CREAT|O_EXCL` guards a temp-file-then-rename write of the keyring, so
//! concurrent processes never observe a half-written file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;

use crate::error::{Error, ErrorKind, Result};
use crate::sasl::hex_encode;

const KEYRING_DIR_MODE: u32 = 0o700;
const KEYRING_FILE_MODE: u32 = 0o600;

/// Cookies older than this (seconds) are purged on load.
const COOKIE_LIFETIME_SECS: i64 = 300;

const LOCK_RETRIES: u32 = 32;
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub(crate) struct Cookie {
    pub(crate) id: u32,
    pub(crate) time: i64,
    pub(crate) cookie: String,
}

fn keyring_dir() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .ok_or_else(|| Error::new(ErrorKind::AuthFailed("HOME is not set".into())))?;
    let dir = PathBuf::from(home).join(".dbus-keyrings");

    if !dir.exists() {
        fs::create_dir(&dir)
            .map_err(|error| Error::new(ErrorKind::AuthFailed(format!("creating keyring dir {dir:?}: {error}"))))?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(KEYRING_DIR_MODE)).map_err(|error| {
            Error::new(ErrorKind::AuthFailed(format!("setting keyring dir mode on {dir:?}: {error}")))
        })?;
    }

    Ok(dir)
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64
}

/// Parse the keyring file for `context`, dropping cookies older than
/// [`COOKIE_LIFETIME_SECS`] or dated in the future. A missing file reads as
/// an empty keyring rather than an error.
fn load(context: &str) -> Result<Vec<Cookie>> {
    let path = keyring_dir()?.join(context);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(Error::new(ErrorKind::AuthFailed(format!("reading keyring {path:?}: {error}")))),
    };

    let now = now();
    let mut cookies = Vec::new();
    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let (Some(id), Some(time), Some(cookie)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let (Ok(id), Ok(time)) = (id.parse::<u32>(), time.parse::<i64>()) else {
            continue;
        };
        if time > now || now - time > COOKIE_LIFETIME_SECS {
            continue;
        }
        cookies.push(Cookie { id, time, cookie: cookie.to_owned() });
    }

    Ok(cookies)
}

/// Look up the cookie content for `cookie_id` in the keyring identified by
/// `context`, per the format written by `dbus-daemon`: one cookie per line,
/// `<id> <creation-unix-time> <cookie>`. Expired cookies are invisible to
/// lookups just as they are to a fresh load.
pub(crate) fn lookup(context: &str, cookie_id: &str) -> Result<Vec<u8>> {
    let id: u32 = cookie_id
        .parse()
        .map_err(|_| Error::new(ErrorKind::AuthFailed(format!("malformed cookie id {cookie_id:?}"))))?;

    load(context)?
        .into_iter()
        .find(|cookie| cookie.id == id)
        .map(|cookie| cookie.cookie.into_bytes())
        .ok_or_else(|| Error::new(ErrorKind::AuthFailed(format!("no cookie {cookie_id} in context {context}"))))
}

/// Run `f` while holding `<context>.lock`, created with `O_CREAT|O_EXCL`.
/// Retries up to [`LOCK_RETRIES`] times at [`LOCK_RETRY_INTERVAL`]; on the
/// final retry, treats the lock as stale, removes it, and tries once more.
fn with_lock<T>(context: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let lock_path = keyring_dir()?.join(format!("{context}.lock"));

    let mut attempt = 0;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(_) => break,
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                attempt += 1;
                if attempt > LOCK_RETRIES {
                    let _ = fs::remove_file(&lock_path);
                    OpenOptions::new().write(true).create_new(true).open(&lock_path).map_err(|error| {
                        Error::new(ErrorKind::AuthFailed(format!("locking keyring {lock_path:?}: {error}")))
                    })?;
                    break;
                }
                std::thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(error) => {
                return Err(Error::new(ErrorKind::AuthFailed(format!("locking keyring {lock_path:?}: {error}"))))
            }
        }
    }

    let result = f();
    let _ = fs::remove_file(&lock_path);
    result
}

fn write_atomic(context: &str, cookies: &[Cookie]) -> Result<()> {
    let dir = keyring_dir()?;
    let target_path = dir.join(context);

    let mut random = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut random);
    let tmp_path = dir.join(format!("{context}.{}", hex_encode(&random)));

    let mut contents = String::new();
    for cookie in cookies {
        contents.push_str(&format!("{} {} {}\n", cookie.id, cookie.time, cookie.cookie));
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(KEYRING_FILE_MODE)
        .open(&tmp_path)
        .map_err(|error| Error::new(ErrorKind::AuthFailed(format!("writing keyring {tmp_path:?}: {error}"))))?;
    file.write_all(contents.as_bytes())
        .map_err(|error| Error::new(ErrorKind::AuthFailed(format!("writing keyring {tmp_path:?}: {error}"))))?;
    drop(file);

    fs::rename(&tmp_path, &target_path)
        .map_err(|error| Error::new(ErrorKind::AuthFailed(format!("renaming keyring into {target_path:?}: {error}"))))?;

    Ok(())
}

/// Persist `cookies` to the context's keyring file via lockfile-and-rename.
pub(crate) fn save(context: &str, cookies: &[Cookie]) -> Result<()> {
    with_lock(context, || write_atomic(context, cookies))
}

/// Mint a fresh 32-byte random cookie for `context`, append it to the
/// already-purged keyring, and persist it. Returns the minted cookie.
pub(crate) fn mint(context: &str) -> Result<Cookie> {
    with_lock(context, || {
        let mut cookies = load(context)?;
        let id = cookies.iter().map(|cookie| cookie.id).max().map_or(0, |max| max + 1);

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let cookie = Cookie { id, time: now(), cookie: hex_encode(&bytes) };

        cookies.push(cookie.clone());
        write_atomic(context, &cookies)?;
        Ok(cookie)
    })
}

/// Load the non-expired cookies for `context`, minting and persisting a
/// fresh one if none remain.
pub(crate) fn load_or_mint(context: &str) -> Result<Vec<Cookie>> {
    let cookies = load(context)?;
    if !cookies.is_empty() {
        return Ok(cookies);
    }
    Ok(vec![mint(context)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_temp_home<T>(f: impl FnOnce() -> T) -> T {
        let dir = std::env::temp_dir().join(format!("dbus-keyring-test-{}", std::process::id()));
        let _ = fs::create_dir_all(&dir);
        let previous = std::env::var_os("HOME");
        std::env::set_var("HOME", &dir);
        let result = f();
        if let Some(previous) = previous {
            std::env::set_var("HOME", previous);
        }
        let _ = fs::remove_dir_all(&dir);
        result
    }

    #[test]
    fn mint_then_lookup_round_trips() {
        with_temp_home(|| {
            let context = "org_test_mint_lookup";
            let minted = mint(context).unwrap();
            let found = lookup(context, &minted.id.to_string()).unwrap();
            assert_eq!(found, minted.cookie.into_bytes());
        });
    }

    #[test]
    fn save_then_load_preserves_non_expired_cookies() {
        with_temp_home(|| {
            let context = "org_test_save_load";
            let now = now();
            let cookies = vec![
                Cookie { id: 1, time: now, cookie: "fresh".into() },
                Cookie { id: 2, time: now - COOKIE_LIFETIME_SECS - 10, cookie: "stale".into() },
                Cookie { id: 3, time: now + 1000, cookie: "future".into() },
            ];
            save(context, &cookies).unwrap();

            let loaded = load(context).unwrap();
            assert_eq!(loaded.len(), 1);
            assert_eq!(loaded[0].id, 1);
        });
    }

    #[test]
    fn load_or_mint_mints_when_keyring_absent() {
        with_temp_home(|| {
            let context = "org_test_load_or_mint";
            let cookies = load_or_mint(context).unwrap();
            assert_eq!(cookies.len(), 1);
        });
    }

    #[test]
    fn keyring_dir_and_file_have_expected_modes() {
        with_temp_home(|| {
            let context = "org_test_modes";
            mint(context).unwrap();

            let dir = keyring_dir().unwrap();
            let dir_mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(dir_mode, KEYRING_DIR_MODE);

            let file_mode = fs::metadata(dir.join(context)).unwrap().permissions().mode() & 0o777;
            assert_eq!(file_mode, KEYRING_FILE_MODE);
        });
    }
}
