use tokio::sync::Mutex as AsyncMutex;

/// Process-wide lock for tests that touch environment variables.
/// Sync tests call `.blocking_lock()`, async tests `.lock().await`.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());
