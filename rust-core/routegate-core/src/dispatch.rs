//! # Dispatch Key
//!
//! The single join key shared by the handler registry, the auth map and the
//! schema map: `lowercase(path) + ":" + uppercase(method)`.
//!
//! Every component that needs to know "which endpoint is this" goes through
//! [`DispatchKey::new`], so routing, auth and validation can never disagree.

use std::fmt;
use std::str::FromStr;

/// HTTP methods a route may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP PATCH
    Patch,
    /// HTTP DELETE
    Delete,
}

impl Method {
    /// All methods accepted in a route table, in display order
    pub const ALL: [Self; 5] = [
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Patch,
        Self::Delete,
    ];

    /// Upper-case wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| s.to_string())
    }
}

/// Normalized `path:METHOD` key
///
/// Derived per request, never stored in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatchKey(String);

impl DispatchKey {
    /// Build a key from a raw path and a raw method string
    ///
    /// The method is not required to be one of [`Method::ALL`]: an inbound
    /// `OPTIONS` request still gets a key, it simply never matches a route.
    #[must_use]
    pub fn new(path: &str, method: &str) -> Self {
        let mut key = String::with_capacity(path.len() + method.len() + 1);
        key.push_str(&path.to_lowercase());
        key.push(':');
        key.push_str(&method.to_uppercase());
        Self(key)
    }

    /// Build a key from a typed method
    #[must_use]
    pub fn for_route(path: &str, method: Method) -> Self {
        Self::new(path, method.as_str())
    }

    /// The normalized key text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DispatchKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalizes_case() {
        let key = DispatchKey::new("/API/Users", "get");
        assert_eq!(key.as_str(), "/api/users:GET");
    }

    #[test]
    fn test_keys_agree_across_spellings() {
        let a = DispatchKey::new("/api/Merchants", "Post");
        let b = DispatchKey::for_route("/api/merchants", Method::Post);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_method_still_keys() {
        let key = DispatchKey::new("/api/users", "options");
        assert_eq!(key.to_string(), "/api/users:OPTIONS");
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("patch".parse::<Method>(), Ok(Method::Patch));
        assert_eq!(" DELETE ".parse::<Method>(), Ok(Method::Delete));
        assert!("HEAD".parse::<Method>().is_err());
        assert!("".parse::<Method>().is_err());
    }

    #[test]
    fn test_method_display() {
        assert_eq!(Method::Put.to_string(), "PUT");
    }
}
