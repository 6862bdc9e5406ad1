//! Topic name grammar: `me` | `fnd` | `usr<id>` | `p2p<idA-idB>` | `grp<rand>` | `new`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicRef {
    Me,
    Fnd,
    /// `usr<id>`: addresses another user by id; the session rewrites this
    /// to a canonical `p2p` name before handing it to the Hub.
    Usr(u64),
    P2p(u64, u64),
    Grp(String),
    /// `new`: request to create a fresh group topic on subscribe.
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicNameError;

impl fmt::Display for TopicNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed topic name")
    }
}

impl std::error::Error for TopicNameError {}

impl TopicRef {
    pub fn parse(name: &str) -> Result<Self, TopicNameError> {
        if name == "me" {
            return Ok(TopicRef::Me);
        }
        if name == "fnd" {
            return Ok(TopicRef::Fnd);
        }
        if name == "new" {
            return Ok(TopicRef::New);
        }
        if let Some(rest) = name.strip_prefix("usr") {
            let id = rest.parse::<u64>().map_err(|_| TopicNameError)?;
            return Ok(TopicRef::Usr(id));
        }
        if let Some(rest) = name.strip_prefix("p2p") {
            let (a, b) = rest.split_once('-').ok_or(TopicNameError)?;
            let a = a.parse::<u64>().map_err(|_| TopicNameError)?;
            let b = b.parse::<u64>().map_err(|_| TopicNameError)?;
            if a == 0 || b == 0 {
                return Err(TopicNameError);
            }
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            return Ok(TopicRef::P2p(lo, hi));
        }
        if let Some(rest) = name.strip_prefix("grp") {
            if rest.is_empty() {
                return Err(TopicNameError);
            }
            return Ok(TopicRef::Grp(rest.to_owned()));
        }
        Err(TopicNameError)
    }

    /// Canonical p2p name for a pair of user ids, sorted ascending.
    pub fn p2p_name(a: u64, b: u64) -> String {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        format!("p2p{lo}-{hi}")
    }

    pub fn canonical(&self) -> String {
        match self {
            TopicRef::Me => "me".to_owned(),
            TopicRef::Fnd => "fnd".to_owned(),
            TopicRef::Usr(id) => format!("usr{id}"),
            TopicRef::P2p(a, b) => Self::p2p_name(*a, *b),
            TopicRef::Grp(rand) => format!("grp{rand}"),
            TopicRef::New => "new".to_owned(),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, TopicRef::Grp(_) | TopicRef::New)
    }

    pub fn is_p2p(&self) -> bool {
        matches!(self, TopicRef::P2p(_, _) | TopicRef::Usr(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2p_name_sorts_ids() {
        assert_eq!(TopicRef::p2p_name(5, 2), "p2p2-5");
        assert_eq!(TopicRef::p2p_name(2, 5), "p2p2-5");
    }

    #[test]
    fn parses_all_variants() {
        assert_eq!(TopicRef::parse("me").unwrap(), TopicRef::Me);
        assert_eq!(TopicRef::parse("fnd").unwrap(), TopicRef::Fnd);
        assert_eq!(TopicRef::parse("new").unwrap(), TopicRef::New);
        assert_eq!(TopicRef::parse("usr42").unwrap(), TopicRef::Usr(42));
        assert_eq!(TopicRef::parse("p2p5-2").unwrap(), TopicRef::P2p(2, 5));
        assert_eq!(
            TopicRef::parse("grpAbC123").unwrap(),
            TopicRef::Grp("AbC123".to_owned())
        );
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(TopicRef::parse("grp").is_err());
        assert!(TopicRef::parse("p2p5").is_err());
        assert!(TopicRef::parse("usrabc").is_err());
        assert!(TopicRef::parse("").is_err());
        assert!(TopicRef::parse("p2p0-5").is_err());
    }
}
