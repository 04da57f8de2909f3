//! Load-balancer routing table composition.
//!
//! Path matchers on the provider are evaluated in list order with no
//! implicit specificity, so [`compose`] orders each host's matchers with
//! literal paths first (shortest first) and the wildcard last.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ProvisionerError;

/// Path that matches everything on a host.
pub const WILDCARD: &str = "/*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMatcher {
    pub paths: Vec<String>,
    pub backend_service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix_rewrite: Option<String>,
}

impl PathMatcher {
    fn is_wildcard(&self) -> bool {
        self.paths.iter().any(|p| p == WILDCARD)
    }

    /// Literal length of the route this matcher was built from.
    fn literal_len(&self) -> usize {
        self.paths.iter().map(String::len).min().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMapping {
    pub host: String,
    pub path_matchers: Vec<PathMatcher>,
    /// Backend serving requests no matcher claims.
    pub default_service: String,
}

/// One routable app: where it is served and which backend serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub url: String,
    pub backend_service: String,
}

impl Route {
    pub fn new(url: impl Into<String>, backend_service: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backend_service: backend_service.into(),
        }
    }
}

/// Split a route URL into host and path. A missing or root path becomes
/// the wildcard, and a trailing `/*` is dropped since every mounted path
/// already covers its subtree. A scheme prefix is accepted and dropped.
pub fn split_url(url: &str) -> Result<(String, String), ProvisionerError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let (host, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    if host.is_empty() {
        return Err(ProvisionerError::Routing(format!("route {url:?} has no host")));
    }
    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(WILDCARD).unwrap_or(path).trim_end_matches('/');
    let path = if path.is_empty() {
        WILDCARD.to_string()
    } else {
        path.to_string()
    };
    Ok((host.to_ascii_lowercase(), path))
}

fn matcher_for(path: &str, backend_service: &str) -> PathMatcher {
    if path == WILDCARD {
        return PathMatcher {
            paths: vec![WILDCARD.to_string()],
            backend_service: backend_service.to_string(),
            path_prefix_rewrite: None,
        };
    }
    // The app is mounted at its root; strip the prefix on the way in.
    PathMatcher {
        paths: vec![path.to_string(), format!("{path}/*")],
        backend_service: backend_service.to_string(),
        path_prefix_rewrite: Some("/".to_string()),
    }
}

/// Build the routing table for a set of routes.
///
/// Output is independent of input order: hosts are sorted, and within a
/// host literal paths sort by length then lexically, with the wildcard
/// last. The wildcard's backend is the host default; without one the first
/// matcher's backend is. Two routes for the same host and path are an error.
pub fn compose(routes: &[Route]) -> Result<Vec<UrlMapping>, ProvisionerError> {
    let mut hosts: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for route in routes {
        let (host, path) = split_url(&route.url)?;
        let paths = hosts.entry(host.clone()).or_default();
        if let Some(existing) = paths.get(&path) {
            return Err(ProvisionerError::Routing(format!(
                "{host}{path} is routed to both {existing} and {}",
                route.backend_service
            )));
        }
        paths.insert(path, route.backend_service.clone());
    }

    let mut table = Vec::with_capacity(hosts.len());
    for (host, paths) in hosts {
        let mut matchers: Vec<PathMatcher> = paths
            .iter()
            .map(|(path, backend)| matcher_for(path, backend))
            .collect();
        matchers.sort_by(|a, b| {
            a.is_wildcard()
                .cmp(&b.is_wildcard())
                .then_with(|| a.literal_len().cmp(&b.literal_len()))
                .then_with(|| a.paths.cmp(&b.paths))
        });

        let default_service = matchers
            .iter()
            .find(|m| m.is_wildcard())
            .or_else(|| matchers.first())
            .map(|m| m.backend_service.clone())
            .unwrap_or_default();

        table.push(UrlMapping {
            host,
            path_matchers: matchers,
            default_service,
        });
    }
    Ok(table)
}

/// Backends referenced anywhere in a routing table.
pub fn backends(table: &[UrlMapping]) -> BTreeSet<String> {
    table
        .iter()
        .flat_map(|m| {
            m.path_matchers
                .iter()
                .map(|p| p.backend_service.clone())
                .chain(std::iter::once(m.default_service.clone()))
        })
        .filter(|b| !b.is_empty())
        .collect()
}

/// One cache invalidation to request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Invalidation {
    pub host: String,
    pub path: String,
}

/// Cache invalidations for every route served by one of `changed`.
///
/// Each matcher yields one request covering everything under its route.
pub fn invalidations(table: &[UrlMapping], changed: &BTreeSet<String>) -> Vec<Invalidation> {
    let mut out = BTreeSet::new();
    for mapping in table {
        for matcher in &mapping.path_matchers {
            if !changed.contains(&matcher.backend_service) {
                continue;
            }
            let path = if matcher.is_wildcard() {
                WILDCARD.to_string()
            } else {
                let root = matcher
                    .paths
                    .iter()
                    .min_by_key(|p| p.len())
                    .map(String::as_str)
                    .unwrap_or_default();
                format!("{root}/*")
            };
            out.insert(Invalidation {
                host: mapping.host.clone(),
                path,
            });
        }
    }
    out.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(m: &UrlMapping) -> Vec<(&str, &str)> {
        m.path_matchers
            .iter()
            .map(|p| (p.paths[0].as_str(), p.backend_service.as_str()))
            .collect()
    }

    #[test]
    fn specific_before_wildcard() {
        let table = compose(&[Route::new("a.com/*", "svcA"), Route::new("a.com/blog", "svcB")]).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].host, "a.com");
        assert_eq!(paths(&table[0]), [("/blog", "svcB"), ("/*", "svcA")]);
        assert_eq!(table[0].default_service, "svcA");
        assert_eq!(table[0].path_matchers[0].paths, ["/blog", "/blog/*"]);
        assert_eq!(table[0].path_matchers[0].path_prefix_rewrite.as_deref(), Some("/"));
    }

    #[test]
    fn root_and_empty_paths_become_wildcard() {
        for url in ["a.com", "a.com/", "https://a.com", "a.com/*"] {
            assert_eq!(split_url(url).unwrap(), ("a.com".into(), "/*".into()), "{url}");
        }
        assert_eq!(split_url("a.com/docs/").unwrap().1, "/docs");
        assert!(split_url("/docs").is_err());
    }

    #[test]
    fn subtree_wildcard_mounts_the_prefix_once() {
        assert_eq!(split_url("a.com/blog/*").unwrap().1, "/blog");
        let table = compose(&[
            Route::new("a.com/blog/*", "svcB"),
            Route::new("a.com", "svcA"),
        ])
        .unwrap();
        assert_eq!(table[0].path_matchers[0].paths, ["/blog", "/blog/*"]);
        assert_eq!(
            table,
            compose(&[Route::new("a.com", "svcA"), Route::new("a.com/blog", "svcB")]).unwrap()
        );
    }

    #[test]
    fn shorter_literals_first_then_lexical() {
        let table = compose(&[
            Route::new("x.io/reports", "r"),
            Route::new("x.io/api", "a"),
            Route::new("x.io/app", "b"),
        ])
        .unwrap();
        assert_eq!(paths(&table[0]), [("/api", "a"), ("/app", "b"), ("/reports", "r")]);
        // No wildcard: the first matcher is the default.
        assert_eq!(table[0].default_service, "a");
    }

    #[test]
    fn permuted_input_gives_identical_table() {
        let routes = vec![
            Route::new("b.com", "web"),
            Route::new("a.com/blog", "blog"),
            Route::new("a.com/*", "site"),
            Route::new("a.com/api/v1", "api"),
            Route::new("b.com/admin", "admin"),
        ];
        let expected = compose(&routes).unwrap();
        let mut permuted = routes.clone();
        for i in 0..permuted.len() {
            permuted.rotate_left(1);
            if i % 2 == 0 {
                permuted.reverse();
            }
            assert_eq!(compose(&permuted).unwrap(), expected);
        }
        let hosts: Vec<_> = expected.iter().map(|m| m.host.as_str()).collect();
        assert_eq!(hosts, ["a.com", "b.com"]);
        for mapping in &expected {
            let wildcards = mapping.path_matchers.iter().filter(|m| m.is_wildcard()).count();
            assert!(wildcards <= 1);
        }
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let err = compose(&[Route::new("a.com/", "x"), Route::new("a.com", "y")]).unwrap_err();
        assert!(matches!(err, ProvisionerError::Routing(_)));
    }

    #[test]
    fn invalidations_cover_changed_backends_only() {
        let table = compose(&[
            Route::new("a.com/*", "site"),
            Route::new("a.com/blog", "blog"),
            Route::new("b.com", "site"),
        ])
        .unwrap();
        let changed = BTreeSet::from(["site".to_string()]);
        assert_eq!(
            invalidations(&table, &changed),
            [
                Invalidation { host: "a.com".into(), path: "/*".into() },
                Invalidation { host: "b.com".into(), path: "/*".into() },
            ]
        );
        let changed = BTreeSet::from(["blog".to_string()]);
        assert_eq!(
            invalidations(&table, &changed),
            [Invalidation { host: "a.com".into(), path: "/blog/*".into() }]
        );
        assert_eq!(backends(&table), BTreeSet::from(["blog".to_string(), "site".to_string()]));
    }
}
