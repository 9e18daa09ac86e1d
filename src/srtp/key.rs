//! Master keys and the MKI-indexed key store.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{Result, SrtpError};
use super::pool::{HashPolicy, LookupTable, Pool, PoolId, PoolPolicy};

/// Master key identifier, as carried in the SRTP packet trailer.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mki(Box<[u8]>);

impl Mki {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Mki(bytes.into().into_boxed_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Mki {
    fn from(bytes: &[u8]) -> Self {
        Mki::new(bytes)
    }
}

impl fmt::Display for Mki {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Mki {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mki({})", self)
    }
}

/// Byte lengths every master key in a session must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterKeySizes {
    pub mki: usize,
    pub key: usize,
    pub salt: usize,
}

impl Default for MasterKeySizes {
    fn default() -> Self {
        Self {
            mki: 4,
            key: 16,
            salt: 14,
        }
    }
}

impl MasterKeySizes {
    pub fn validate(&self) -> Result<()> {
        if self.mki < 1 {
            return Err(SrtpError::bad_param("mki size must be at least 1"));
        }
        if self.key < 1 {
            return Err(SrtpError::bad_param("master key size must be at least 1"));
        }
        Ok(())
    }
}

/// A master key and salt identified by its MKI.
#[derive(Clone)]
pub struct MasterKey {
    pub mki: Mki,
    pub key: Vec<u8>,
    pub salt: Vec<u8>,
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // key material stays out of logs
        f.debug_struct("MasterKey")
            .field("mki", &self.mki)
            .field("key_len", &self.key.len())
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

#[derive(Debug)]
struct StoredKey {
    key: MasterKey,
    limit_reached: bool,
}

/// MKI → master key store, backed by a sized pool and lookup table.
#[derive(Debug)]
pub struct MasterKeyStore {
    sizes: MasterKeySizes,
    pool: Pool<StoredKey>,
    index: LookupTable<Mki, PoolId>,
}

impl MasterKeyStore {
    pub fn new(sizes: MasterKeySizes, pool: PoolPolicy, hash: HashPolicy) -> Result<Self> {
        sizes.validate()?;
        Ok(Self {
            sizes,
            pool: Pool::new("master key pool", pool)?,
            index: LookupTable::new("master key hash", hash)?,
        })
    }

    pub fn sizes(&self) -> MasterKeySizes {
        self.sizes
    }

    /// Copy a key into the store. Duplicate MKIs are refused.
    pub fn add(&mut self, mki: &[u8], key: &[u8], salt: &[u8]) -> Result<&MasterKey> {
        self.check_lengths(mki, key, salt)?;
        let mki = Mki::from(mki);
        if self.index.contains_key(&mki) {
            return Err(SrtpError::bad_param(format!("mki {} already in use", mki)));
        }

        let stored = StoredKey {
            key: MasterKey {
                mki: mki.clone(),
                key: key.to_vec(),
                salt: salt.to_vec(),
            },
            limit_reached: false,
        };
        let id = self.pool.insert(stored)?;
        if let Err(e) = self.index.insert(mki, id) {
            self.pool.remove(id);
            return Err(e);
        }
        self.pool
            .get(id)
            .map(|s| &s.key)
            .ok_or(SrtpError::NullPtr("master key"))
    }

    fn check_lengths(&self, mki: &[u8], key: &[u8], salt: &[u8]) -> Result<()> {
        if mki.len() != self.sizes.mki {
            return Err(SrtpError::bad_param(format!(
                "mki is {} bytes, expected {}",
                mki.len(),
                self.sizes.mki
            )));
        }
        if key.len() != self.sizes.key {
            return Err(SrtpError::bad_param(format!(
                "master key is {} bytes, expected {}",
                key.len(),
                self.sizes.key
            )));
        }
        if salt.len() != self.sizes.salt {
            return Err(SrtpError::bad_param(format!(
                "master salt is {} bytes, expected {}",
                salt.len(),
                self.sizes.salt
            )));
        }
        Ok(())
    }

    pub fn remove(&mut self, mki: &Mki) -> Result<MasterKey> {
        let id = self
            .index
            .remove(mki)
            .ok_or_else(|| SrtpError::not_found(format!("master key {}", mki)))?;
        self.pool
            .remove(id)
            .map(|s| s.key)
            .ok_or(SrtpError::NullPtr("master key"))
    }

    pub fn clear(&mut self) -> Vec<Mki> {
        let removed: Vec<Mki> = self.index.drain().map(|(mki, _)| mki).collect();
        self.pool.clear();
        removed
    }

    pub fn get(&self, mki: &Mki) -> Option<&MasterKey> {
        let id = self.index.get(mki)?;
        self.pool.get(*id).map(|s| &s.key)
    }

    pub fn contains(&self, mki: &Mki) -> bool {
        self.index.contains_key(mki)
    }

    /// Validate an MKI argument and make sure the key exists.
    pub fn lookup(&self, mki: &[u8]) -> Result<Mki> {
        if mki.len() != self.sizes.mki {
            return Err(SrtpError::bad_param(format!(
                "mki is {} bytes, expected {}",
                mki.len(),
                self.sizes.mki
            )));
        }
        let mki = Mki::from(mki);
        if !self.contains(&mki) {
            return Err(SrtpError::not_found(format!("master key {}", mki)));
        }
        Ok(mki)
    }

    /// Mark a key as exhausted. Returns `true` the first time.
    pub fn mark_limit_reached(&mut self, mki: &Mki) -> bool {
        let Some(id) = self.index.get(mki).copied() else {
            return false;
        };
        match self.pool.get_mut(id) {
            Some(stored) if !stored.limit_reached => {
                stored.limit_reached = true;
                true
            }
            _ => false,
        }
    }

    pub fn limit_reached(&self, mki: &Mki) -> bool {
        self.index
            .get(mki)
            .and_then(|id| self.pool.get(*id))
            .map(|s| s.limit_reached)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn mkis(&self) -> impl Iterator<Item = &Mki> {
        self.index.iter().map(|(mki, _)| mki)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srtp::pool::PoolKind;

    fn store() -> MasterKeyStore {
        MasterKeyStore::new(
            MasterKeySizes::default(),
            PoolPolicy::default(),
            HashPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let mut keys = store();
        keys.add(&[0, 0, 0, 1], &[0x11; 16], &[0x22; 14]).unwrap();
        let key = keys.get(&Mki::new(vec![0, 0, 0, 1])).unwrap();
        assert_eq!(key.key, vec![0x11; 16]);
        assert_eq!(key.salt, vec![0x22; 14]);
    }

    #[test]
    fn test_add_rejects_wrong_lengths() {
        let mut keys = store();
        assert!(matches!(
            keys.add(&[1, 2], &[0; 16], &[0; 14]),
            Err(SrtpError::BadParam(_))
        ));
        assert!(matches!(
            keys.add(&[1, 2, 3, 4], &[0; 15], &[0; 14]),
            Err(SrtpError::BadParam(_))
        ));
        assert!(matches!(
            keys.add(&[1, 2, 3, 4], &[0; 16], &[0; 13]),
            Err(SrtpError::BadParam(_))
        ));
        assert!(keys.is_empty());
    }

    #[test]
    fn test_duplicate_mki_refused() {
        let mut keys = store();
        keys.add(&[1; 4], &[0; 16], &[0; 14]).unwrap();
        assert!(matches!(
            keys.add(&[1; 4], &[9; 16], &[9; 14]),
            Err(SrtpError::BadParam(_))
        ));
        assert_eq!(keys.get(&Mki::new(vec![1; 4])).unwrap().key, vec![0; 16]);
    }

    #[test]
    fn test_remove_unknown() {
        let mut keys = store();
        assert!(matches!(
            keys.remove(&Mki::new(vec![7; 4])),
            Err(SrtpError::NotFound(_))
        ));
    }

    #[test]
    fn test_fixed_pool_out_of_resources() {
        let pool = PoolPolicy {
            kind: PoolKind::Fixed,
            max_items: 1,
            ..PoolPolicy::default()
        };
        let mut keys =
            MasterKeyStore::new(MasterKeySizes::default(), pool, HashPolicy::default()).unwrap();
        keys.add(&[1; 4], &[0; 16], &[0; 14]).unwrap();
        assert_eq!(
            keys.add(&[2; 4], &[0; 16], &[0; 14]).unwrap_err(),
            SrtpError::OutOfResources("master key pool")
        );
    }

    #[test]
    fn test_clear_then_lookup() {
        let mut keys = store();
        keys.add(&[1; 4], &[0; 16], &[0; 14]).unwrap();
        keys.add(&[2; 4], &[0; 16], &[0; 14]).unwrap();
        let removed = keys.clear();
        assert_eq!(removed.len(), 2);
        assert!(matches!(keys.lookup(&[1; 4]), Err(SrtpError::NotFound(_))));
    }

    #[test]
    fn test_sizes_validation() {
        let sizes = MasterKeySizes {
            mki: 0,
            ..MasterKeySizes::default()
        };
        assert!(sizes.validate().is_err());
        let sizes = MasterKeySizes {
            key: 0,
            ..MasterKeySizes::default()
        };
        assert!(sizes.validate().is_err());
        let sizes = MasterKeySizes {
            salt: 0,
            ..MasterKeySizes::default()
        };
        assert!(sizes.validate().is_ok());
    }

    #[test]
    fn test_mki_display_hex() {
        assert_eq!(Mki::new(vec![0xde, 0xad, 0x00, 0x01]).to_string(), "dead0001");
    }
}
