//! Deep-link URL parsing.
//!
//! Auth callbacks carry their tokens in the URL fragment (after `#`),
//! encoded as query parameters. Only two path shapes are recognized here;
//! the shell does not own generic deep-link routing.

use std::collections::HashMap;

/// Path marker for password-recovery callbacks.
const RECOVERY_PATH_MARKER: &str = "password-reset";

/// Path markers for generic OAuth/email confirmation callbacks.
const CALLBACK_PATH_MARKERS: [&str; 2] = ["auth/v1/callback", "auth/callback"];

/// A recognized auth deep link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeepLink {
    /// Generic OAuth/email callback carrying both tokens.
    AuthCallback {
        access_token: String,
        refresh_token: String,
    },
    /// Password-recovery callback (`type=recovery`) carrying both tokens.
    Recovery {
        access_token: String,
        refresh_token: String,
    },
}

impl DeepLink {
    /// Parse a URL into a recognized auth deep link.
    ///
    /// Returns `None` for anything that should be silently ignored: unknown
    /// paths, missing tokens, or a recovery path without the recovery
    /// marker. Stale and malformed links are expected (re-opened emails,
    /// manual edits) and are never an error.
    pub fn parse(url: &str) -> Option<DeepLink> {
        let (path, fragment) = match url.split_once('#') {
            Some((path, fragment)) => (path, fragment),
            None => (url, ""),
        };

        let params: HashMap<String, String> = url::form_urlencoded::parse(fragment.as_bytes())
            .into_owned()
            .collect();

        if path.contains(RECOVERY_PATH_MARKER) {
            if params.get("type").map(String::as_str) != Some("recovery") {
                return None;
            }
            let access_token = params.get("access_token")?.clone();
            let refresh_token = params.get("refresh_token")?.clone();
            return Some(DeepLink::Recovery {
                access_token,
                refresh_token,
            });
        }

        if CALLBACK_PATH_MARKERS
            .iter()
            .any(|marker| path.contains(marker))
        {
            let access_token = params.get("access_token")?.clone();
            let refresh_token = params.get("refresh_token")?.clone();
            return Some(DeepLink::AuthCallback {
                access_token,
                refresh_token,
            });
        }

        None
    }
}
