// 加密凭证存储
//
// 凭证以 AES-256-GCM 加密后写入凭证文件，密钥首次使用时随机生成并单独保存。
// 两个文件都只允许所有者读写（Unix 下为 0600）。
// 密钥文件丢失后，已保存的凭证将永久无法解密。

use crate::auth::{Credential, CredentialError};
use crate::config::OAuthConfig;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// AES-256 密钥长度
const KEY_LEN: usize = 32;

/// GCM nonce 长度
const NONCE_LEN: usize = 12;

/// 加密凭证存储
#[derive(Debug, Clone)]
pub struct CredentialStore {
    /// 加密凭证文件
    token_path: PathBuf,
    /// 密钥文件
    key_path: PathBuf,
}

impl CredentialStore {
    pub fn new(token_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
            key_path: key_path.into(),
        }
    }

    pub fn from_config(config: &OAuthConfig) -> Self {
        Self::new(config.token_path(), config.key_path())
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// 凭证文件是否存在
    pub fn exists(&self) -> bool {
        self.token_path.is_file()
    }

    /// 加密并保存凭证
    pub fn put(&self, credential: &Credential) -> Result<(), CredentialError> {
        let key = self.load_or_create_key()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let plaintext = serde_json::to_vec(credential)
            .map_err(|e| CredentialError::storage(&self.token_path, e))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|e| CredentialError::storage(&self.token_path, format!("加密失败: {}", e)))?;

        // nonce || ciphertext，整体 base64 编码
        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        let encoded = general_purpose::STANDARD.encode(&combined);

        write_private(&self.token_path, encoded.as_bytes())?;
        info!("凭证已加密保存: {:?}", self.token_path);
        Ok(())
    }

    /// 读取并解密凭证
    pub fn get(&self) -> Result<Credential, CredentialError> {
        let encoded = match fs::read_to_string(&self.token_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(CredentialError::NotFound),
            Err(e) => return Err(CredentialError::storage(&self.token_path, e)),
        };

        // 凭证存在但密钥不存在：密钥已丢失，无法恢复
        let key = match self.read_key()? {
            Some(key) => key,
            None => {
                return Err(CredentialError::CorruptData(
                    "密钥文件不存在，无法解密已保存的凭证".to_string(),
                ))
            }
        };
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let combined = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CredentialError::CorruptData(format!("base64 解码失败: {}", e)))?;
        if combined.len() <= NONCE_LEN {
            return Err(CredentialError::CorruptData("密文长度不足".to_string()));
        }

        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CredentialError::CorruptData("解密失败（密钥不匹配或数据被篡改）".to_string()))?;

        let credential: Credential = serde_json::from_slice(&plaintext)
            .map_err(|e| CredentialError::CorruptData(format!("凭证解析失败: {}", e)))?;

        debug!("凭证读取成功: {:?}", self.token_path);
        Ok(credential)
    }

    /// 删除凭证文件（可选同时删除密钥），文件不存在时不报错
    pub fn clear(&self, remove_key: bool) -> Result<(), CredentialError> {
        remove_if_exists(&self.token_path)?;
        if remove_key {
            remove_if_exists(&self.key_path)?;
        }
        info!("已清除本地凭证 (删除密钥: {})", remove_key);
        Ok(())
    }

    fn read_key(&self) -> Result<Option<Vec<u8>>, CredentialError> {
        let content = match fs::read_to_string(&self.key_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CredentialError::storage(&self.key_path, e)),
        };

        let key = general_purpose::STANDARD
            .decode(content.trim())
            .map_err(|e| CredentialError::CorruptData(format!("密钥文件格式错误: {}", e)))?;
        if key.len() != KEY_LEN {
            return Err(CredentialError::CorruptData(format!(
                "密钥长度错误: {} bytes",
                key.len()
            )));
        }
        Ok(Some(key))
    }

    fn load_or_create_key(&self) -> Result<Vec<u8>, CredentialError> {
        if let Some(key) = self.read_key()? {
            return Ok(key);
        }

        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        write_private(
            &self.key_path,
            general_purpose::STANDARD.encode(&key).as_bytes(),
        )?;
        info!("已生成新的凭证加密密钥: {:?}", self.key_path);
        Ok(key)
    }
}

/// 以仅所有者可读写的权限写入文件（先写临时文件再替换）
fn write_private(path: &Path, content: &[u8]) -> Result<(), CredentialError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CredentialError::storage(parent, e))?;
    }

    let tmp_path = path.with_extension("tmp");
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(&tmp_path)
        .map_err(|e| CredentialError::storage(&tmp_path, e))?;
    file.write_all(content)
        .and_then(|_| file.sync_all())
        .map_err(|e| CredentialError::storage(&tmp_path, e))?;
    drop(file);

    restrict_permissions(&tmp_path)?;
    fs::rename(&tmp_path, path).map_err(|e| CredentialError::storage(path, e))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), CredentialError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| CredentialError::storage(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), CredentialError> {
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), CredentialError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!("删除文件失败: {:?}, 错误: {}", path, e);
            Err(CredentialError::storage(path, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample() -> Credential {
        Credential {
            access_token: "ya29.access".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expires_at: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
            scopes: vec![crate::auth::SCOPE_YOUTUBE_UPLOAD.to_string()],
            client_id: "client.apps.googleusercontent.com".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
        }
    }

    fn store_in(dir: &Path) -> CredentialStore {
        CredentialStore::new(dir.join("tokens/token.enc"), dir.join("tokens/.key"))
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.put(&sample()).unwrap();
        assert_eq!(store.get().unwrap(), sample());

        // 密文中不应出现明文令牌
        let raw = fs::read_to_string(store.token_path()).unwrap();
        assert!(!raw.contains("ya29.access"));
    }

    #[test]
    fn test_key_reused_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.put(&sample()).unwrap();
        let key_before = fs::read_to_string(store.key_path()).unwrap();

        let mut updated = sample();
        updated.access_token = "ya29.rotated".to_string();
        store.put(&updated).unwrap();

        assert_eq!(fs::read_to_string(store.key_path()).unwrap(), key_before);
        assert_eq!(store.get().unwrap().access_token, "ya29.rotated");
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(store_in(dir.path()).get(), Err(CredentialError::NotFound));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.put(&sample()).unwrap();

        let raw = fs::read_to_string(store.token_path()).unwrap();
        fs::write(store.token_path(), &raw[..raw.len() / 2]).unwrap();

        assert!(matches!(store.get(), Err(CredentialError::CorruptData(_))));
    }

    #[test]
    fn test_lost_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.put(&sample()).unwrap();

        fs::remove_file(store.key_path()).unwrap();
        assert!(matches!(store.get(), Err(CredentialError::CorruptData(_))));

        // 重新生成的密钥也无法解密旧数据
        store.load_or_create_key().unwrap();
        assert!(matches!(store.get(), Err(CredentialError::CorruptData(_))));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.clear(true).unwrap();

        store.put(&sample()).unwrap();
        store.clear(false).unwrap();
        assert!(!store.exists());
        assert!(store.key_path().exists());

        store.clear(true).unwrap();
        assert!(!store.key_path().exists());
        store.clear(true).unwrap();
    }

    #[test]
    fn test_unwritable_directory_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        // 父路径是普通文件，无法创建目录
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let store = CredentialStore::new(blocker.join("token.enc"), blocker.join(".key"));

        assert!(matches!(
            store.put(&sample()),
            Err(CredentialError::StorageError { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.put(&sample()).unwrap();

        for path in [store.token_path(), store.key_path()] {
            let mode = fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{:?}", path);
        }
    }
}
