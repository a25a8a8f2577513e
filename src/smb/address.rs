// Share addressing
//
// The connection string (`smb://host/share/...`) may be rewritten at any time
// by hostname resolution while operations are in flight. Readers take a copy
// under the lock and never hold it across a blocking SMB call.

use parking_lot::Mutex;
use std::net::IpAddr;

pub const SMB_URL_SCHEME: &str = "smb://";

/// Returns `(host, suffix)` for an `smb://host/suffix` URL.
pub fn split_share_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix(SMB_URL_SCHEME)?;
    let (host, suffix) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    if host.is_empty() {
        return None;
    }
    Some((host, suffix))
}

/// The literal path used to reach the share.
#[derive(Debug)]
pub struct ShareAddress {
    original: String,
    current: Mutex<String>,
}

impl ShareAddress {
    pub fn new(share_path: impl Into<String>) -> Self {
        let original = share_path.into();
        Self { current: Mutex::new(original.clone()), original }
    }

    /// The address as configured, before any resolution
    pub fn original(&self) -> &str {
        &self.original
    }

    /// A copy of the current address
    pub fn current(&self) -> String {
        self.current.lock().clone()
    }

    /// Full URL for a share-relative path (always starting with `/`).
    pub fn url_for(&self, path: &str) -> String {
        let mut url = self.current();
        url.push_str(path);
        url
    }

    /// Swap the host segment for a resolved address, or restore the original
    /// hostname when `resolved` is `None`.
    pub fn set_resolved_address(&self, resolved: Option<IpAddr>) {
        let updated = match resolved {
            Some(ip) => match split_share_url(&self.original) {
                Some((_, suffix)) => {
                    let host = match ip {
                        IpAddr::V4(v4) => v4.to_string(),
                        IpAddr::V6(v6) => format!("[{}]", v6),
                    };
                    format!("{}{}{}", SMB_URL_SCHEME, host, suffix)
                }
                None => {
                    tracing::warn!(share = %self.original, "Cannot rewrite malformed share address");
                    return;
                }
            },
            None => self.original.clone(),
        };

        let mut current = self.current.lock();
        if *current != updated {
            tracing::info!(from = %*current, to = %updated, "Share address updated");
            *current = updated;
        }
    }
}
