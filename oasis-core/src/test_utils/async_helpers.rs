//! Async test helpers

use std::future::Future;
use std::sync::Arc;

use tokio::time::{timeout, Duration};

use crate::rpc::RpcSession;

/// Default timeout for async test operations
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Await `future`, panicking with `what` if it takes longer than `duration`
pub async fn assert_completes_within<F, T>(duration: Duration, what: &str, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(value) => value,
        Err(_) => panic!("{} did not complete within {:?}", what, duration),
    }
}

/// Whether two handles refer to the same session object
pub fn same_handle(a: &Arc<dyn RpcSession>, b: &Arc<dyn RpcSession>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
