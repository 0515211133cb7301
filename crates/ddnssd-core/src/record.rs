//! DNS record model
//!
//! [`DnsRecord`] is the value type everything else trades in: the container
//! model derives them, the reconciler diffs them, the backends store them.
//! Identity is the `(name, type, value)` tuple; TTL and casing never
//! participate. `value()` is the canonical master-file text used as the
//! identity content inside backends.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Record types the daemon knows how to manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Srv,
    Ptr,
    Txt,
    Cname,
}

impl RecordType {
    /// All managed types, in the order backends enumerate them.
    pub const ALL: [RecordType; 6] = [
        RecordType::A,
        RecordType::Aaaa,
        RecordType::Srv,
        RecordType::Ptr,
        RecordType::Txt,
        RecordType::Cname,
    ];

    /// Upper-case ASCII identifier, as stored by SQL backends and cloud APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Srv => "SRV",
            RecordType::Ptr => "PTR",
            RecordType::Txt => "TXT",
            RecordType::Cname => "CNAME",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            "SRV" => Ok(RecordType::Srv),
            "PTR" => Ok(RecordType::Ptr),
            "TXT" => Ok(RecordType::Txt),
            "CNAME" => Ok(RecordType::Cname),
            other => Err(Error::invariant(format!("unsupported record type: {other}"))),
        }
    }
}

/// Type-specific payload of a [`DnsRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Ptr {
        target: String,
    },
    /// `key=value` attribute strings; insertion order is significant.
    Txt(Vec<String>),
    Cname {
        target: String,
    },
}

/// A single resource record under the configured base domain.
///
/// Names are stored lowercase without a trailing dot. Relative targets
/// (SRV/PTR/CNAME) are stored the same way and emitted absolute.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    name: String,
    ttl: u32,
    data: RecordData,
}

impl DnsRecord {
    pub fn new(name: impl Into<String>, ttl: u32, data: RecordData) -> Self {
        let data = match data {
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            } => RecordData::Srv {
                priority,
                weight,
                port,
                target: canonical_name(&target),
            },
            RecordData::Ptr { target } => RecordData::Ptr {
                target: canonical_name(&target),
            },
            RecordData::Cname { target } => RecordData::Cname {
                target: canonical_name(&target),
            },
            other => other,
        };
        Self {
            name: canonical_name(&name.into()),
            ttl,
            data,
        }
    }

    pub fn a(name: impl Into<String>, ttl: u32, addr: Ipv4Addr) -> Self {
        Self::new(name, ttl, RecordData::A(addr))
    }

    pub fn aaaa(name: impl Into<String>, ttl: u32, addr: Ipv6Addr) -> Self {
        Self::new(name, ttl, RecordData::Aaaa(addr))
    }

    pub fn srv(
        name: impl Into<String>,
        ttl: u32,
        priority: u16,
        weight: u16,
        port: u16,
        target: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            ttl,
            RecordData::Srv {
                priority,
                weight,
                port,
                target: target.into(),
            },
        )
    }

    pub fn ptr(name: impl Into<String>, ttl: u32, target: impl Into<String>) -> Self {
        Self::new(
            name,
            ttl,
            RecordData::Ptr {
                target: target.into(),
            },
        )
    }

    pub fn txt(name: impl Into<String>, ttl: u32, attributes: Vec<String>) -> Self {
        Self::new(name, ttl, RecordData::Txt(attributes))
    }

    pub fn cname(name: impl Into<String>, ttl: u32, target: impl Into<String>) -> Self {
        Self::new(
            name,
            ttl,
            RecordData::Cname {
                target: target.into(),
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn data(&self) -> &RecordData {
        &self.data
    }

    pub fn rtype(&self) -> RecordType {
        match self.data {
            RecordData::A(_) => RecordType::A,
            RecordData::Aaaa(_) => RecordType::Aaaa,
            RecordData::Srv { .. } => RecordType::Srv,
            RecordData::Ptr { .. } => RecordType::Ptr,
            RecordData::Txt(_) => RecordType::Txt,
            RecordData::Cname { .. } => RecordType::Cname,
        }
    }

    /// Canonical wire-text form of the payload.
    ///
    /// SRV: `priority weight port target.`; PTR/CNAME: `target.`;
    /// TXT: space-separated quoted `key=value` strings, order preserved.
    pub fn value(&self) -> String {
        match &self.data {
            RecordData::A(addr) => addr.to_string(),
            RecordData::Aaaa(addr) => addr.to_string(),
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            } => format!("{priority} {weight} {port} {target}."),
            RecordData::Ptr { target } => format!("{target}."),
            RecordData::Cname { target } => format!("{target}."),
            RecordData::Txt(attrs) => {
                if attrs.is_empty() {
                    "\"\"".to_string()
                } else {
                    attrs
                        .iter()
                        .map(|a| quote_txt(a))
                        .collect::<Vec<_>>()
                        .join(" ")
                }
            }
        }
    }

    /// Parse the canonical wire-text form back into a record.
    ///
    /// Inverse of [`DnsRecord::value`]; tolerant of missing trailing dots and
    /// mixed case, so backend round trips normalise rather than diverge.
    pub fn parse(name: &str, ttl: u32, rtype: RecordType, text: &str) -> Result<Self> {
        let data = match rtype {
            RecordType::A => RecordData::A(
                text.trim()
                    .parse()
                    .map_err(|e| Error::invariant(format!("bad A value {text:?}: {e}")))?,
            ),
            RecordType::Aaaa => RecordData::Aaaa(
                text.trim()
                    .parse()
                    .map_err(|e| Error::invariant(format!("bad AAAA value {text:?}: {e}")))?,
            ),
            RecordType::Srv => {
                let mut parts = text.split_whitespace();
                let mut field = |what: &str| {
                    parts
                        .next()
                        .ok_or_else(|| Error::invariant(format!("SRV value {text:?} missing {what}")))
                };
                let priority = parse_u16(field("priority")?)?;
                let weight = parse_u16(field("weight")?)?;
                let port = parse_u16(field("port")?)?;
                let target = field("target")?.to_string();
                RecordData::Srv {
                    priority,
                    weight,
                    port,
                    target: canonical_name(&target),
                }
            }
            RecordType::Ptr => RecordData::Ptr {
                target: canonical_name(text.trim()),
            },
            RecordType::Cname => RecordData::Cname {
                target: canonical_name(text.trim()),
            },
            RecordType::Txt => RecordData::Txt(parse_txt(text)?),
        };
        Ok(Self::new(name, ttl, data))
    }

    /// Whether this daemon claims deletion rights over the record.
    ///
    /// A/AAAA records are ours when their name sits at or under the host
    /// FQDN; SRV records when their target does. PTR/TXT/CNAME are shared
    /// with other writers and never owned.
    pub fn owned_by(&self, hostname: &str) -> bool {
        let hostname = canonical_name(hostname);
        match &self.data {
            RecordData::A(_) | RecordData::Aaaa(_) => name_at_or_under(&self.name, &hostname),
            RecordData::Srv { target, .. } => name_at_or_under(target, &hostname),
            _ => false,
        }
    }

    /// Name one label up from this record's name (e.g. the service name of an
    /// instance name). `None` once at the zone apex.
    pub fn parent_name(&self) -> Option<&str> {
        self.name.split_once('.').map(|(_, rest)| rest)
    }
}

impl PartialEq for DnsRecord {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.rtype() == other.rtype() && self.value() == other.value()
    }
}

impl Eq for DnsRecord {}

impl Hash for DnsRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.rtype().hash(state);
        self.value().hash(state);
    }
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.name,
            self.ttl,
            self.rtype(),
            self.value()
        )
    }
}

/// The zone-wide service enumeration name (RFC 6763 §9).
pub fn enumeration_name(base_domain: &str) -> String {
    format!("_services._dns-sd._udp.{}", canonical_name(base_domain))
}

/// Lowercase, no trailing dot.
pub fn canonical_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

fn name_at_or_under(name: &str, suffix: &str) -> bool {
    name == suffix || name.ends_with(&format!(".{suffix}"))
}

fn parse_u16(s: &str) -> Result<u16> {
    s.parse()
        .map_err(|e| Error::invariant(format!("bad integer {s:?}: {e}")))
}

fn quote_txt(attr: &str) -> String {
    let escaped = attr.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Parse space-separated quoted strings; a single bare token is accepted for
/// interop with stores that strip quotes from lone values.
fn parse_txt(text: &str) -> Result<Vec<String>> {
    let text = text.trim();
    if text.is_empty() || text == "\"\"" {
        return Ok(Vec::new());
    }
    if !text.contains('"') {
        return Ok(vec![text.to_string()]);
    }

    let mut attrs = Vec::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            ' ' => continue,
            '"' => {
                let mut current = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => {
                                return Err(Error::invariant(format!(
                                    "unterminated escape in TXT value {text:?}"
                                )));
                            }
                        },
                        Some('"') => break,
                        Some(other) => current.push(other),
                        None => {
                            return Err(Error::invariant(format!(
                                "unterminated string in TXT value {text:?}"
                            )));
                        }
                    }
                }
                if !current.is_empty() {
                    attrs.push(current);
                }
            }
            other => {
                return Err(Error::invariant(format!(
                    "unexpected character {other:?} in TXT value {text:?}"
                )));
            }
        }
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(r: &DnsRecord) -> DnsRecord {
        DnsRecord::parse(r.name(), r.ttl(), r.rtype(), &r.value()).unwrap()
    }

    #[test]
    fn canonical_value_forms() {
        let srv = DnsRecord::srv("c1._http._tcp.example.com", 60, 0, 0, 80, "c1.example.com");
        assert_eq!(srv.value(), "0 0 80 c1.example.com.");

        let ptr = DnsRecord::ptr("_http._tcp.example.com", 60, "c1._http._tcp.example.com.");
        assert_eq!(ptr.value(), "c1._http._tcp.example.com.");

        let txt = DnsRecord::txt(
            "c1._http._tcp.example.com",
            60,
            vec!["path=/".into(), "vers=1".into()],
        );
        assert_eq!(txt.value(), "\"path=/\" \"vers=1\"");

        let empty_txt = DnsRecord::txt("c1._http._tcp.example.com", 60, vec![]);
        assert_eq!(empty_txt.value(), "\"\"");
    }

    #[test]
    fn parse_emit_roundtrip_all_types() {
        let records = vec![
            DnsRecord::a("c1.example.com", 60, "10.0.0.1".parse().unwrap()),
            DnsRecord::aaaa("c1.example.com", 60, "fd00::1".parse().unwrap()),
            DnsRecord::srv("c1._http._tcp.example.com", 60, 10, 20, 8080, "c1.example.com"),
            DnsRecord::ptr("_http._tcp.example.com", 60, "c1._http._tcp.example.com"),
            DnsRecord::txt("c1._http._tcp.example.com", 60, vec!["k=v".into(), "a=b c".into()]),
            DnsRecord::txt("c2._http._tcp.example.com", 60, vec![]),
            DnsRecord::cname("alias.example.com", 60, "c1.example.com"),
        ];
        for r in &records {
            assert_eq!(&roundtrip(r), r, "round trip changed {r}");
        }
    }

    #[test]
    fn txt_escapes_survive_roundtrip() {
        let txt = DnsRecord::txt(
            "c1._http._tcp.example.com",
            60,
            vec!["note=say \"hi\"".into(), "path=C:\\tmp".into()],
        );
        assert_eq!(&roundtrip(&txt), &txt);
    }

    #[test]
    fn equality_ignores_ttl_and_case() {
        let a = DnsRecord::a("C1.Example.COM.", 60, "10.0.0.1".parse().unwrap());
        let b = DnsRecord::a("c1.example.com", 300, "10.0.0.1".parse().unwrap());
        assert_eq!(a, b);
        assert_eq!(a.name(), "c1.example.com");
    }

    #[test]
    fn txt_attribute_order_is_significant() {
        let a = DnsRecord::txt("n.example.com", 60, vec!["a=1".into(), "b=2".into()]);
        let b = DnsRecord::txt("n.example.com", 60, vec!["b=2".into(), "a=1".into()]);
        assert_ne!(a, b);
    }

    #[test]
    fn ownership_follows_name_or_target() {
        let host = "host.example.com";
        assert!(DnsRecord::a("c1.host.example.com", 60, "10.0.0.1".parse().unwrap()).owned_by(host));
        assert!(!DnsRecord::a("other.example.com", 60, "10.0.0.1".parse().unwrap()).owned_by(host));
        assert!(
            DnsRecord::srv("c1._http._tcp.example.com", 60, 0, 0, 80, "c1.host.example.com")
                .owned_by(host)
        );
        assert!(
            !DnsRecord::srv("c1._http._tcp.example.com", 60, 0, 0, 80, "elsewhere.example.com")
                .owned_by(host)
        );
        // Shared types are never owned, even under our name.
        assert!(
            !DnsRecord::ptr("_http._tcp.host.example.com", 60, "x.host.example.com").owned_by(host)
        );
        assert!(!DnsRecord::txt("c1.host.example.com", 60, vec![]).owned_by(host));
        assert!(!DnsRecord::cname("c1.host.example.com", 60, "host.example.com").owned_by(host));
    }

    #[test]
    fn ownership_requires_label_boundary() {
        // "nothost.example.com" must not match the "host.example.com" suffix.
        assert!(
            !DnsRecord::a("c1.nothost.example.com", 60, "10.0.0.1".parse().unwrap())
                .owned_by("host.example.com")
        );
    }

    #[test]
    fn name_helpers() {
        assert_eq!(
            enumeration_name("Example.COM."),
            "_services._dns-sd._udp.example.com"
        );
        let srv = DnsRecord::srv("c1._http._tcp.example.com", 60, 0, 0, 80, "c1.example.com");
        assert_eq!(srv.parent_name(), Some("_http._tcp.example.com"));
    }

    #[test]
    fn record_type_strings() {
        for rtype in RecordType::ALL {
            assert_eq!(rtype.as_str().parse::<RecordType>().unwrap(), rtype);
        }
        assert!("NAPTR".parse::<RecordType>().is_err());
    }
}
