//! Durable mapping of network name to secret.
//!
//! The store is a flat text object, one profile per line:
//!
//! ```text
//! HomeNetwork;hunter22
//! Cabin;s3cret
//! ```
//!
//! Each line is `name;secret` terminated by `\n`. There is no header and no escaping: the
//! portal form never submits a name or secret containing `;` or a line break, and the format
//! relies on that. A name or secret containing the delimiter is written as-is and will not
//! read back the same.
//!
//! The backing object is reached through [`ProfileStorage`], which only knows how to read and
//! replace raw bytes. Every [`CredentialStore::save`] rewrites the whole object.
//!
//! # Example
//!
//! ```rust,ignore
//! use wifi_portal::credential_store::{CredentialStore, NetworkName, Secret};
//!
//! let mut store = CredentialStore::new(storage);
//! store.add(&NetworkName::try_from("Home")?, &Secret::try_from("pw1")?)?;
//! for (name, secret) in &store.load() {
//!     // try each profile in file order
//! }
//! ```

use core::fmt::Write as _;

use heapless::{FnvIndexMap, String, Vec};

use crate::{Error, Result};

/// Longest network name a profile can hold (802.11 SSID limit).
pub const MAX_NAME_LEN: usize = 32;
/// Longest secret a profile can hold (WPA2 passphrase limit).
pub const MAX_SECRET_LEN: usize = 64;
/// Number of profiles the store keeps. Must be a power of two.
pub const MAX_PROFILES: usize = 8;
/// Largest serialized store, in bytes.
pub const MAX_STORE_BYTES: usize = MAX_PROFILES * (MAX_NAME_LEN + MAX_SECRET_LEN + 2);
/// Name of the persistent object holding the profiles.
pub const CREDENTIALS_OBJECT: &str = "wifi.dat";

const DELIMITER: char = ';';

/// Network name (SSID).
pub type NetworkName = String<MAX_NAME_LEN>;
/// Network secret (passphrase).
pub type Secret = String<MAX_SECRET_LEN>;
/// All stored profiles, in the order the backing object lists them.
pub type Profiles = FnvIndexMap<NetworkName, Secret, MAX_PROFILES>;

/// Raw access to the one persistent object that backs a [`CredentialStore`].
pub trait ProfileStorage {
    /// Copy the object into `buf`.
    ///
    /// Returns `Ok(None)` when the object does not exist, otherwise the number of bytes
    /// copied.
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>>;

    /// Replace the object with `bytes`.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
}

impl<T: ProfileStorage + ?Sized> ProfileStorage for &mut T {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        (**self).read(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }
}

/// Credential store over a [`ProfileStorage`].
///
/// The store is the only owner of its backing object. It keeps no cache: every
/// [`load`](Self::load) goes back to storage.
pub struct CredentialStore<S> {
    storage: S,
}

impl<S: ProfileStorage> CredentialStore<S> {
    /// Wrap `storage`.
    #[must_use]
    pub const fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Read every stored profile.
    ///
    /// An absent, unreadable or non-UTF-8 object yields an empty map: having no store is not
    /// an error. Lines without a delimiter, and lines whose fields overflow their capacity,
    /// are skipped.
    pub fn load(&mut self) -> Profiles {
        let mut buffer = [0u8; MAX_STORE_BYTES];
        let len = match self.storage.read(&mut buffer) {
            Ok(Some(len)) => len.min(buffer.len()),
            Ok(None) => return Profiles::new(),
            Err(err) => {
                warn!("Credential store unreadable: {:?}", err);
                return Profiles::new();
            }
        };

        let Some(text) = buffer.get(..len).and_then(|bytes| core::str::from_utf8(bytes).ok())
        else {
            warn!("Credential store is not valid UTF-8");
            return Profiles::new();
        };

        parse_profiles(text)
    }

    /// Replace the backing object with `profiles`.
    pub fn save(&mut self, profiles: &Profiles) -> Result<()> {
        let bytes = serialize_profiles(profiles)?;
        self.storage.write(&bytes)?;
        info!("Saved {} credential profile(s)", profiles.len());
        Ok(())
    }

    /// Insert or overwrite one profile, then rewrite the store.
    ///
    /// A new name arriving at a full store evicts the oldest profile.
    pub fn add(&mut self, name: &NetworkName, secret: &Secret) -> Result<()> {
        let mut profiles = self.load();
        if profiles.len() == MAX_PROFILES && !profiles.contains_key(name) {
            profiles = evict_oldest(&profiles)?;
        }
        profiles
            .insert(name.clone(), secret.clone())
            .map_err(|_| Error::StorageFull)?;
        self.save(&profiles)
    }

    /// Give the backing storage back.
    pub fn into_inner(self) -> S {
        self.storage
    }
}

fn parse_profiles(text: &str) -> Profiles {
    let mut profiles = Profiles::new();
    for line in text.lines() {
        let line = line.trim();
        let Some((name, secret)) = line.split_once(DELIMITER) else {
            continue;
        };
        let (Ok(name), Ok(secret)) = (NetworkName::try_from(name), Secret::try_from(secret)) else {
            warn!("Skipping oversized credential profile");
            continue;
        };
        if profiles.insert(name, secret).is_err() {
            warn!("Credential store holds more than {} profiles", MAX_PROFILES);
            break;
        }
    }
    profiles
}

fn evict_oldest(profiles: &Profiles) -> Result<Profiles> {
    let mut kept = Profiles::new();
    for (name, secret) in profiles.iter().skip(1) {
        kept.insert(name.clone(), secret.clone())
            .map_err(|_| Error::StorageFull)?;
    }
    if let Some((name, _)) = profiles.first() {
        info!("Credential store full, dropping {}", name.as_str());
    }
    Ok(kept)
}

fn serialize_profiles(profiles: &Profiles) -> Result<Vec<u8, MAX_STORE_BYTES>> {
    let mut text = String::<MAX_STORE_BYTES>::new();
    for (name, secret) in profiles {
        writeln!(text, "{name}{DELIMITER}{secret}").map_err(|_| Error::StorageFull)?;
    }
    Ok(text.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> NetworkName {
        NetworkName::try_from(text).unwrap()
    }

    #[test]
    fn parse_skips_lines_without_delimiter() {
        let profiles = parse_profiles("Home;pw1\ngarbage\n\nCabin;pw2\n");
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles.get(&name("Home")).map(String::as_str), Some("pw1"));
        assert_eq!(profiles.get(&name("Cabin")).map(String::as_str), Some("pw2"));
    }

    #[test]
    fn parse_trims_carriage_returns_and_splits_once() {
        let profiles = parse_profiles("Home;a;b\r\n");
        assert_eq!(profiles.get(&name("Home")).map(String::as_str), Some("a;b"));
    }

    #[test]
    fn later_line_overwrites_earlier_name() {
        let profiles = parse_profiles("Home;old\nHome;new\n");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles.get(&name("Home")).map(String::as_str), Some("new"));
    }

    #[test]
    fn evicting_keeps_order_of_the_rest() {
        let profiles = parse_profiles("A;1\nB;2\nC;3\n");
        let kept = evict_oldest(&profiles).unwrap();
        let names: heapless::Vec<&str, MAX_PROFILES> = kept.keys().map(String::as_str).collect();
        assert_eq!(names.as_slice(), ["B", "C"]);
    }

    #[test]
    fn serialize_writes_one_line_per_profile() {
        let mut profiles = Profiles::new();
        profiles
            .insert(name("Home"), Secret::try_from("pw1").unwrap())
            .unwrap();
        profiles
            .insert(name("Cabin"), Secret::try_from("pw2").unwrap())
            .unwrap();
        let bytes = serialize_profiles(&profiles).unwrap();
        assert_eq!(bytes.as_slice(), b"Home;pw1\nCabin;pw2\n");
    }
}
