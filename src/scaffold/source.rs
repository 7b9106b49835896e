//! Source URL resolution: structured decomposition of go-getter style module
//! locations, HTTPS-to-SSH transport rewriting, and version-ref attachment.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

pub const REF_PARAM: &str = "ref";
pub const REF_VAR: &str = "Ref";
pub const SOURCE_TYPE_VAR: &str = "SourceUrlType";
pub const SOURCE_TYPE_HTTPS: &str = "git-https";
pub const SOURCE_TYPE_SSH: &str = "git-ssh";
pub const SSH_USER_VAR: &str = "SourceGitSshUser";
pub const DEFAULT_SSH_USER: &str = "git";

/// Separator between the repository and the module subpath inside it.
pub const SUBPATH_SEPARATOR: &str = "//";

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SourceUrlError(pub String);

/// The recognized address shapes. Anything else fails to parse; rewrites that
/// do not apply to the current shape leave the address unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// `scheme://[user@]host/path`, optionally with a `//subpath` inside
    /// `path`. Userinfo is carried through so `ssh://git@...` URLs survive
    /// the round trip intact.
    Url {
        scheme: String,
        user: Option<String>,
        host: String,
        path: String,
    },
    /// scp-like `user@host:path`, optionally with a `//subpath` inside `path`.
    Scp {
        user: String,
        host: String,
        path: String,
    },
}

/// A parsed module source location: optional forced-getter prefix (the `git`
/// in `git::https://...`), an address, and an order-preserving query multimap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    forced: Option<String>,
    address: Address,
    query: Vec<(String, String)>,
}

/// Collaborator answering "what is the latest release tag of this repository".
/// An `Ok(None)` is a valid "no tags" answer, not an error.
#[async_trait]
pub trait TagLookup: Send + Sync {
    async fn latest_release_tag(&self, repo_root: &str) -> anyhow::Result<Option<String>>;
}

impl SourceUrl {
    pub fn parse(raw: &str) -> Result<Self, SourceUrlError> {
        if raw.trim().is_empty() {
            return Err(SourceUrlError("empty source URL".to_string()));
        }

        let (forced, rest) = split_forced_prefix(raw);
        let (address_part, query_part) = match rest.split_once('?') {
            Some((a, q)) => (a, Some(q)),
            None => (rest, None),
        };

        let (forced, address) = parse_address(forced, address_part)?;
        let query = query_part.map(parse_query).unwrap_or_default();

        Ok(Self {
            forced: forced.map(str::to_string),
            address,
            query,
        })
    }

    /// First value for `key`, if any.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace every occurrence of `key` with a single entry.
    pub fn set_query(&mut self, key: &str, value: &str) {
        self.query.retain(|(k, _)| k != key);
        self.query.push((key.to_string(), value.to_string()));
    }

    /// The module subpath after the `//` separator, if present.
    pub fn subpath(&self) -> Option<&str> {
        let path = match &self.address {
            Address::Url { path, .. } | Address::Scp { path, .. } => path,
        };
        path.split_once(SUBPATH_SEPARATOR).map(|(_, sub)| sub)
    }

    /// The repository root as a git-usable URL string: subpath stripped, no
    /// forced prefix, no query. This is what tag lookup and cloning operate on.
    pub fn repo_root_url(&self) -> String {
        let strip = |path: &str| {
            path.split_once(SUBPATH_SEPARATOR)
                .map(|(root, _)| root.to_string())
                .unwrap_or_else(|| path.to_string())
        };
        match &self.address {
            Address::Url {
                scheme,
                user,
                host,
                path,
            } => {
                let userinfo = user.as_deref().map(|u| format!("{u}@")).unwrap_or_default();
                format!("{scheme}://{userinfo}{host}{}", strip(path))
            }
            Address::Scp { user, host, path } => {
                format!("{user}@{host}:{}", strip(path))
            }
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    fn into_parts(self) -> (Option<String>, Address, Vec<(String, String)>) {
        (self.forced, self.address, self.query)
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(forced) = &self.forced {
            write!(f, "{forced}::")?;
        }
        match &self.address {
            Address::Url {
                scheme,
                user,
                host,
                path,
            } => {
                write!(f, "{scheme}://")?;
                if let Some(user) = user {
                    write!(f, "{user}@")?;
                }
                write!(f, "{host}{path}")?;
            }
            Address::Scp { user, host, path } => write!(f, "{user}@{host}:{path}")?,
        }
        for (i, (k, v)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{k}={v}")?;
        }
        Ok(())
    }
}

/// Split the `vcs::` forced-getter prefix off, if present.
fn split_forced_prefix(raw: &str) -> (Option<&str>, &str) {
    if let Some((prefix, rest)) = raw.split_once("::") {
        if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return (Some(prefix), rest);
        }
    }
    (None, raw)
}

fn parse_address<'a>(
    forced: Option<&'a str>,
    address: &str,
) -> Result<(Option<&'a str>, Address), SourceUrlError> {
    if address.contains("://") {
        let parsed = url::Url::parse(address)
            .map_err(|e| SourceUrlError(format!("not a valid URL: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| SourceUrlError("URL has no host".to_string()))?;
        let host = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let user = match parsed.username() {
            "" => None,
            user => Some(user.to_string()),
        };
        return Ok((
            forced,
            Address::Url {
                scheme: parsed.scheme().to_string(),
                user,
                host,
                path: parsed.path().to_string(),
            },
        ));
    }

    if let Some(scp) = parse_scp_address(address) {
        return Ok((forced, scp));
    }

    // Bare `host.tld/org/repo` shorthand: promote to forced git over https.
    if let Some((host, path)) = address.split_once('/') {
        if host.contains('.') && !path.is_empty() {
            return Ok((
                forced.or(Some("git")),
                Address::Url {
                    scheme: "https".to_string(),
                    user: None,
                    host: host.to_string(),
                    path: format!("/{path}"),
                },
            ));
        }
    }

    Err(SourceUrlError(format!(
        "unrecognized source URL shape `{address}`"
    )))
}

fn parse_scp_address(address: &str) -> Option<Address> {
    let (user, rest) = address.split_once('@')?;
    let (host, path) = rest.split_once(':')?;
    if user.is_empty() || host.is_empty() || host.contains('/') || path.is_empty() {
        return None;
    }
    Some(Address::Scp {
        user: user.to_string(),
        host: host.to_string(),
        path: path.to_string(),
    })
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Rewrite the transport to SSH when (and only when) the `SourceUrlType`
/// variable asks for `git-ssh` and the current address is an HTTPS URL. Any
/// other combination leaves the URL untouched; an HTTPS request over a shape
/// that cannot be rewritten logs a warning and falls back.
pub fn rewrite_transport(url: SourceUrl, vars: &HashMap<String, String>) -> SourceUrl {
    let requested = vars
        .get(SOURCE_TYPE_VAR)
        .map(String::as_str)
        .unwrap_or(SOURCE_TYPE_HTTPS);
    if requested != SOURCE_TYPE_SSH {
        return url;
    }

    let (_, address, query) = url.clone().into_parts();
    match address {
        Address::Url {
            scheme, host, path, ..
        } if scheme == "https" => {
            let user = vars
                .get(SSH_USER_VAR)
                .cloned()
                .unwrap_or_else(|| DEFAULT_SSH_USER.to_string());
            SourceUrl {
                forced: None,
                address: Address::Scp {
                    user,
                    host,
                    path: path.trim_start_matches('/').to_string(),
                },
                query,
            }
        }
        _ => {
            warn!("Cannot rewrite `{url}` to SSH transport, keeping it as-is");
            url
        }
    }
}

/// Attach a version ref to the URL's query parameters.
///
/// Precedence: an explicit `Ref` variable overwrites unconditionally; an
/// already-present `ref` parameter is left alone; otherwise the latest release
/// tag of the repository root is discovered. A failed or empty lookup leaves
/// the URL unpinned with a warning; an unpinned module is a usability defect,
/// not a correctness blocker.
pub async fn attach_ref(
    mut url: SourceUrl,
    vars: &HashMap<String, String>,
    tags: &dyn TagLookup,
) -> SourceUrl {
    if let Some(reference) = vars.get(REF_VAR) {
        url.set_query(REF_PARAM, reference);
        return url;
    }

    if url.query(REF_PARAM).is_some() {
        return url;
    }

    let root = url.repo_root_url();
    match tags.latest_release_tag(&root).await {
        Ok(Some(tag)) => url.set_query(REF_PARAM, &tag),
        Ok(None) => warn!("No release tag found for {root}, leaving `{url}` unpinned"),
        Err(e) => warn!("Failed to find latest release tag for {root}: {e:#}; leaving `{url}` unpinned"),
    }
    url
}

/// Full source resolution: parse, rewrite transport, attach ref.
pub async fn resolve(
    raw: &str,
    vars: &HashMap<String, String>,
    tags: &dyn TagLookup,
) -> Result<SourceUrl, SourceUrlError> {
    let url = SourceUrl::parse(raw)?;
    let url = rewrite_transport(url, vars);
    Ok(attach_ref(url, vars, tags).await)
}
