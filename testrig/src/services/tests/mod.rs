//! Service-specific tests
//!
//! Process tests run real `sh` commands; discovery tests use the mocked
//! runner; authority tests drive a fake server/agent script.


#[cfg(test)]
pub mod common {
    use std::time::Duration;
    use tokio::time::timeout;

    /// Upper bound for anything that should finish promptly
    pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Run `future`, failing the test if it does not finish within [`TEST_TIMEOUT`]
    pub async fn with_timeout<T, F>(future: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        timeout(TEST_TIMEOUT, future).await.expect("operation timed out")
    }

    /// `sh -c <script>` as an argument list
    pub fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }
}
