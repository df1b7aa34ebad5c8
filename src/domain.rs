use crate::error::Error;
use hickory_resolver::Name;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Longest textual domain name we accept (RFC 1035, without the trailing root dot)
const MAX_DOMAIN_LENGTH: usize = 253;

/// A tracked domain name.
///
/// Names are normalized on parse: surrounding whitespace and a trailing root dot are removed,
/// the name is lower-cased, internationalized names are converted to their ASCII (punycode)
/// form and a leading wildcard label is dropped, since HTTP-01 can only validate the base name.
/// The normalized form doubles as the name of the per-domain certificate directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainName {
    ascii: String,
}

impl DomainName {
    pub fn as_str(&self) -> &str {
        &self.ascii
    }

    /// File name stem used for downloads, e.g. `example_com` for `example.com`
    pub fn file_stem(&self) -> String {
        self.ascii.replace('.', "_")
    }

    fn invalid(name: &str, reason: impl Into<String>) -> Error {
        Error::InvalidDomain {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl FromStr for DomainName {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let without_wildcard = trimmed.strip_prefix("*.").unwrap_or(trimmed);
        let relative = without_wildcard
            .strip_suffix('.')
            .unwrap_or(without_wildcard);
        if relative.is_empty() {
            return Err(Self::invalid(raw, "the name is empty"));
        }
        let name = Name::from_utf8(relative)
            .map_err(|e| Self::invalid(raw, format!("not a valid DNS name ({e})")))?;
        let ascii = name.to_lowercase().to_ascii();
        let ascii = ascii.strip_suffix('.').unwrap_or(&ascii).to_string();
        if ascii.len() > MAX_DOMAIN_LENGTH {
            return Err(Self::invalid(
                raw,
                format!("longer than {MAX_DOMAIN_LENGTH} characters"),
            ));
        }
        if let Some(bad) = ascii
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '.' || *c == '-'))
        {
            return Err(Self::invalid(raw, format!("contains the character {bad:?}")));
        }
        if ascii.split('.').any(str::is_empty) {
            return Err(Self::invalid(raw, "contains an empty label"));
        }
        Ok(Self { ascii })
    }
}

impl TryFrom<&str> for DomainName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<String> for DomainName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.as_str().parse()
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.ascii)
    }
}

impl Serialize for DomainName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

struct DomainNameVisitor;

impl Visitor<'_> for DomainNameVisitor {
    type Value = DomainName;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a domain name string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        DomainName::from_str(v).map_err(|e| E::custom(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for DomainName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(DomainNameVisitor)
    }
}
