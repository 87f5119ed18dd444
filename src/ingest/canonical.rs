// src/ingest/canonical.rs
//! Canonical article URLs and registrable domains.

use url::Url;

/// Query parameters that only identify a campaign, never the article.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "yclid", "mc_cid", "mc_eid", "ref", "cmpid"];

/// Resolve `link` against `base` and strip fragments and tracking params.
/// Returns `None` for anything that is not an absolute http(s) URL.
pub fn canonical_url(link: &str, base: Option<&str>) -> Option<Url> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    let mut url = match Url::parse(link) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(base?).ok()?;
            base.join(link).ok()?
        }
        Err(_) => return None,
    };
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    Some(url)
}

/// Registrable domain of a URL's host per the Public Suffix List (private
/// section included): `www.cbr.ru` → `cbr.ru`, `news.bbc.co.uk` →
/// `bbc.co.uk`, `team.github.io` stays whole. IP hosts and bare suffixes are
/// returned as-is.
pub fn registrable_domain(url: &Url) -> String {
    let host = match url.host() {
        Some(url::Host::Domain(d)) => d.trim_end_matches('.').to_ascii_lowercase(),
        Some(other) => return other.to_string(),
        None => return String::new(),
    };
    match psl::domain_str(&host) {
        Some(domain) => domain.to_string(),
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fragment_and_tracking() {
        let u = canonical_url(
            "https://www.Reuters.com/markets/rates?id=42&utm_source=rss&utm_medium=feed#top",
            None,
        )
        .unwrap();
        assert_eq!(u.as_str(), "https://www.reuters.com/markets/rates?id=42");
    }

    #[test]
    fn drops_empty_query() {
        let u = canonical_url("https://cbr.ru/press/?utm_campaign=x", None).unwrap();
        assert_eq!(u.as_str(), "https://cbr.ru/press/");
    }

    #[test]
    fn resolves_relative_links() {
        let u = canonical_url("/press/pr/?file=1", Some("https://www.cbr.ru/rss/eventrss")).unwrap();
        assert_eq!(u.as_str(), "https://www.cbr.ru/press/pr/?file=1");
        assert!(canonical_url("/press/1", None).is_none());
    }

    #[test]
    fn rejects_non_http() {
        assert!(canonical_url("mailto:desk@example.test", None).is_none());
        assert!(canonical_url("   ", None).is_none());
    }

    #[test]
    fn registrable_domains() {
        let d = |s: &str| registrable_domain(&Url::parse(s).unwrap());
        assert_eq!(d("https://www.cbr.ru/x"), "cbr.ru");
        assert_eq!(d("https://press.federalreserve.gov/x"), "federalreserve.gov");
        assert_eq!(d("https://news.bbc.co.uk/x"), "bbc.co.uk");
        assert_eq!(d("https://asx.com.au/x"), "asx.com.au");
        assert_eq!(d("http://127.0.0.1:8080/feed"), "127.0.0.1");
    }

    #[test]
    fn hosted_blogs_keep_their_own_domain() {
        let d = |s: &str| registrable_domain(&Url::parse(s).unwrap());
        assert_eq!(d("https://alpha.github.io/feed.xml"), "alpha.github.io");
        assert_eq!(d("https://beta.github.io/feed.xml"), "beta.github.io");
        assert_eq!(d("https://rates.blogspot.com/feeds/posts"), "rates.blogspot.com");
    }
}
