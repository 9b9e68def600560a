use anyhow::Result;
use async_trait::async_trait;

#[cfg(target_arch = "wasm32")]
pub trait StorageBounds {}
#[cfg(target_arch = "wasm32")]
impl<T> StorageBounds for T {}

#[cfg(not(target_arch = "wasm32"))]
pub trait StorageBounds: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> StorageBounds for T {}

/// Flat string-keyed store. `read` of a missing key is `Ok(None)`.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Storage: StorageBounds {
    async fn read(&self, key: &str) -> Result<Option<String>>;
    async fn write(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn clear_all(&self) -> Result<()>;
}

// --- Native Implementation ---

#[cfg(not(target_arch = "wasm32"))]
use std::path::PathBuf;

/// One file per key under `root`. File names are the percent-encoded key.
#[cfg(not(target_arch = "wasm32"))]
pub struct NativeStorage {
    root: PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl NativeStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(urlencoding::encode(key).as_ref())
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some(tokio::fs::read_to_string(path).await?))
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(key), value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(keys);
        }

        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            match urlencoding::decode(&name) {
                Ok(key) if key.starts_with(prefix) => keys.push(key.into_owned()),
                Ok(_) => {}
                Err(e) => log::warn!("Skipping undecodable storage entry {}: {}", name, e),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn clear_all(&self) -> Result<()> {
        for key in self.list("").await? {
            self.delete(&key).await?;
        }
        Ok(())
    }
}

// --- Web Implementation ---

#[cfg(target_arch = "wasm32")]
use anyhow::anyhow;

/// `window.localStorage`. Writes are visible to every tab of the origin, last write wins.
#[cfg(target_arch = "wasm32")]
pub struct WebStorage {
    storage: web_sys::Storage,
}

#[cfg(target_arch = "wasm32")]
impl WebStorage {
    pub fn new() -> Result<Self> {
        let window = web_sys::window().ok_or_else(|| anyhow!("No window available"))?;
        let storage = window
            .local_storage()
            .map_err(|e| anyhow!("localStorage error: {:?}", e))?
            .ok_or_else(|| anyhow!("localStorage is not available"))?;
        Ok(Self { storage })
    }

    fn keys(&self) -> Result<Vec<String>> {
        let len = self
            .storage
            .length()
            .map_err(|e| anyhow!("Length error: {:?}", e))?;
        let mut keys = Vec::with_capacity(len as usize);
        for i in 0..len {
            if let Some(k) = self.storage.key(i).map_err(|e| anyhow!("Key error: {:?}", e))? {
                keys.push(k);
            }
        }
        Ok(keys)
    }
}

#[cfg(target_arch = "wasm32")]
#[async_trait(?Send)]
impl Storage for WebStorage {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        self.storage
            .get_item(key)
            .map_err(|e| anyhow!("Get error: {:?}", e))
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.storage
            .set_item(key, value)
            .map_err(|e| anyhow!("Set error: {:?}", e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.storage
            .remove_item(key)
            .map_err(|e| anyhow!("Remove error: {:?}", e))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear_all(&self) -> Result<()> {
        self.storage
            .clear()
            .map_err(|e| anyhow!("Clear error: {:?}", e))
    }
}
