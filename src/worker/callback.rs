//! Terminal-status callbacks.

use std::time::Duration;

use crate::jobs::JobView;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs the final job view to a submitter-supplied URL.
#[derive(Debug, Clone)]
pub struct CallbackNotifier {
    client: reqwest::Client,
    timeout: Duration,
}

impl CallbackNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Send `view` as JSON. Non-2xx responses are errors.
    pub async fn notify(&self, url: &str, view: &JobView) -> Result<(), reqwest::Error> {
        self.client
            .post(url)
            .timeout(self.timeout)
            .json(view)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl Default for CallbackNotifier {
    fn default() -> Self {
        Self::new(CALLBACK_TIMEOUT)
    }
}
