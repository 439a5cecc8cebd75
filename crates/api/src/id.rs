//! Types dealing with sequence, blob and client identity.

use crate::*;
use std::sync::Arc;

macro_rules! imp_deref {
    ($i:ty, $t:ty) => {
        impl std::ops::Deref for $i {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

macro_rules! imp_from {
    ($a:ty, $b:ty, $i:ident => $e:expr) => {
        impl From<$b> for $a {
            fn from($i: $b) -> Self {
                $e
            }
        }
    };
}

/// Seq-id type codes as stored by the backend.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(into = "i16", try_from = "i16")]
#[repr(i16)]
#[allow(missing_docs)]
pub enum SeqIdType {
    Local = 1,
    Gibbsq = 2,
    Gibbmt = 3,
    Giim = 4,
    Genbank = 5,
    Embl = 6,
    Pir = 7,
    Swissprot = 8,
    Patent = 9,
    Other = 10,
    General = 11,
    Gi = 12,
    Ddbj = 13,
    Prf = 14,
    Pdb = 15,
    Tpg = 16,
    Tpe = 17,
    Tpd = 18,
    Gpipe = 19,
    NamedAnnotTrack = 20,
}

const FASTA_PREFIXES: &[(&str, SeqIdType)] = &[
    ("lcl", SeqIdType::Local),
    ("bbs", SeqIdType::Gibbsq),
    ("bbm", SeqIdType::Gibbmt),
    ("gim", SeqIdType::Giim),
    ("gb", SeqIdType::Genbank),
    ("emb", SeqIdType::Embl),
    ("pir", SeqIdType::Pir),
    ("sp", SeqIdType::Swissprot),
    ("pat", SeqIdType::Patent),
    ("ref", SeqIdType::Other),
    ("gnl", SeqIdType::General),
    ("gi", SeqIdType::Gi),
    ("dbj", SeqIdType::Ddbj),
    ("prf", SeqIdType::Prf),
    ("pdb", SeqIdType::Pdb),
    ("tpg", SeqIdType::Tpg),
    ("tpe", SeqIdType::Tpe),
    ("tpd", SeqIdType::Tpd),
    ("gpp", SeqIdType::Gpipe),
    ("nat", SeqIdType::NamedAnnotTrack),
];

impl From<SeqIdType> for i16 {
    fn from(t: SeqIdType) -> Self {
        t as i16
    }
}

impl TryFrom<i16> for SeqIdType {
    type Error = GwError;

    fn try_from(v: i16) -> GwResult<Self> {
        FASTA_PREFIXES
            .iter()
            .map(|(_, t)| *t)
            .find(|t| *t as i16 == v)
            .ok_or_else(|| GwError::client(format!("unknown seq id type {v}")))
    }
}

impl SeqIdType {
    /// Look up a type by its fasta-style prefix (`ref`, `gb`, ...).
    pub fn from_fasta_prefix(prefix: &str) -> Option<Self> {
        let prefix = prefix.to_ascii_lowercase();
        FASTA_PREFIXES
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, t)| *t)
    }

    /// True for types whose identifiers are "accession[.version]".
    pub fn is_accession_like(&self) -> bool {
        !matches!(
            self,
            Self::Local | Self::General | Self::Gi | Self::Pdb | Self::Patent
        )
    }
}

/// The parsed form of a user supplied sequence identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedSeqId {
    /// The id type, if the input carried one (fasta prefix, bare gi).
    pub seq_id_type: Option<SeqIdType>,

    /// The identifying text without prefix or version.
    pub accession: String,

    /// The version, if the input carried one.
    pub version: Option<i16>,

    /// The gi, for gi-typed identifiers.
    pub gi: Option<i64>,
}

/// A user supplied sequence identifier, as received and as parsed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SeqId {
    text: Arc<str>,
    parsed: ParsedSeqId,
}

impl std::fmt::Display for SeqId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

impl std::fmt::Debug for SeqId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SeqId({})", self.text)
    }
}

impl serde::Serialize for SeqId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> serde::Deserialize<'de> for SeqId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SeqId::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn split_version(s: &str) -> (String, Option<i16>) {
    if let Some((acc, ver)) = s.rsplit_once('.') {
        if let Ok(v) = ver.parse::<i16>() {
            if !acc.is_empty() && v > 0 {
                return (acc.to_string(), Some(v));
            }
        }
    }
    (s.to_string(), None)
}

fn looks_like_accession(s: &str) -> bool {
    let (acc, _) = split_version(s);
    let letters = acc
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '_')
        .count();
    letters > 0
        && letters < acc.len()
        && acc[letters..].chars().all(|c| c.is_ascii_digit())
}

impl SeqId {
    /// Parse a sequence identifier.
    ///
    /// Accepted forms: a bare number (gi), `gi|N`, fasta style
    /// `ref|NC_000001.11|` / `gb|AB000001.1|name`, `lcl|text`,
    /// `gnl|DB|tag` and bare accessions with or without a version.
    pub fn parse(input: &str) -> GwResult<Self> {
        let text = input.trim();
        if text.is_empty() {
            return Err(GwError::client("empty seq id"));
        }

        let parsed = if text.chars().all(|c| c.is_ascii_digit()) {
            Self::parse_gi(text)?
        } else if let Some((prefix, rest)) = text.split_once('|') {
            let seq_id_type =
                SeqIdType::from_fasta_prefix(prefix).ok_or_else(|| {
                    GwError::client(format!("unknown seq id prefix {prefix}"))
                })?;
            let rest = rest.trim_end_matches('|');
            if rest.is_empty() {
                return Err(GwError::client(format!(
                    "seq id {text} has no content"
                )));
            }
            match seq_id_type {
                SeqIdType::Gi => Self::parse_gi(rest)?,
                t if t.is_accession_like() => {
                    // the optional trailing field is a name, not an id
                    let first = rest.split('|').next().unwrap_or(rest);
                    let (accession, version) = split_version(first);
                    ParsedSeqId {
                        seq_id_type: Some(t),
                        accession,
                        version,
                        gi: None,
                    }
                }
                t => ParsedSeqId {
                    seq_id_type: Some(t),
                    accession: rest.to_string(),
                    version: None,
                    gi: None,
                },
            }
        } else if looks_like_accession(text) {
            let (accession, version) = split_version(text);
            ParsedSeqId {
                seq_id_type: None,
                accession: accession.to_ascii_uppercase(),
                version,
                gi: None,
            }
        } else {
            ParsedSeqId {
                seq_id_type: None,
                accession: text.to_string(),
                version: None,
                gi: None,
            }
        };

        Ok(Self {
            text: text.to_string().into_boxed_str().into(),
            parsed,
        })
    }

    fn parse_gi(s: &str) -> GwResult<ParsedSeqId> {
        let gi: i64 = s
            .parse()
            .map_err(|e| GwError::client(format!("invalid gi {s}: {e}")))?;
        if gi <= 0 {
            return Err(GwError::client(format!("invalid gi {s}")));
        }
        Ok(ParsedSeqId {
            seq_id_type: Some(SeqIdType::Gi),
            accession: gi.to_string(),
            version: None,
            gi: Some(gi),
        })
    }

    /// The input text as received (trimmed).
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The parsed form.
    pub fn parsed(&self) -> &ParsedSeqId {
        &self.parsed
    }

    /// The gi, if this is a gi-typed identifier.
    pub fn gi(&self) -> Option<i64> {
        self.parsed.gi
    }

    /// True if this is a gi-typed identifier.
    pub fn is_gi(&self) -> bool {
        self.parsed.gi.is_some()
    }

    /// True if this looks like an accession, with or without a type prefix.
    pub fn is_accession_like(&self) -> bool {
        match self.parsed.seq_id_type {
            Some(t) => t.is_accession_like(),
            None => looks_like_accession(&self.text),
        }
    }

    /// "accession.version" if a version is present, otherwise the
    /// accession alone.
    pub fn versioned_accession(&self) -> String {
        match self.parsed.version {
            Some(v) => format!("{}.{v}", self.parsed.accession),
            None => self.parsed.accession.clone(),
        }
    }
}

/// Identifies a blob in the backend: a satellite number selecting the
/// keyspace and a key inside it. Displayed as `sat.sat_key`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct BlobId {
    /// Satellite number.
    pub sat: i32,
    /// Key within the satellite keyspace.
    pub sat_key: i32,
}

impl BlobId {
    /// Construct a new blob id.
    pub fn new(sat: i32, sat_key: i32) -> Self {
        Self { sat, sat_key }
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.sat, self.sat_key)
    }
}

impl std::str::FromStr for BlobId {
    type Err = GwError;

    fn from_str(s: &str) -> GwResult<Self> {
        let bad = || GwError::client(format!("invalid blob id {s}"));
        let (sat, key) = s.split_once('.').ok_or_else(bad)?;
        Ok(Self {
            sat: sat.parse().map_err(|_| bad())?,
            sat_key: key.parse().map_err(|_| bad())?,
        })
    }
}

/// Split descriptor of a blob: `sat.info.chunks[.split_version]`.
///
/// `info` is the storage key of the split-info ("index") chunk, the data
/// chunks are stored at the `chunks` keys right below it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Id2Info {
    /// Satellite of the split blobs.
    pub sat: i32,
    /// Storage key of the split-info chunk.
    pub info: i32,
    /// Number of data chunks.
    pub chunks: i32,
    /// Split version, 0 when absent.
    pub split_version: i32,
}

impl std::fmt::Display for Id2Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.sat, self.info, self.chunks)?;
        if self.split_version != 0 {
            write!(f, ".{}", self.split_version)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Id2Info {
    type Err = GwError;

    fn from_str(s: &str) -> GwResult<Self> {
        let bad = |why: &str| GwError::client(format!("id2 info {s}: {why}"));
        let parts = s
            .split('.')
            .map(|p| p.parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| bad("non-numeric field"))?;
        let out = match parts.as_slice() {
            [sat, info, chunks] => Self {
                sat: *sat,
                info: *info,
                chunks: *chunks,
                split_version: 0,
            },
            [sat, info, chunks, split_version] => Self {
                sat: *sat,
                info: *info,
                chunks: *chunks,
                split_version: *split_version,
            },
            _ => return Err(bad("expected 3 or 4 fields")),
        };
        if out.chunks < 0 || out.info <= out.chunks {
            return Err(bad("inconsistent chunk count"));
        }
        Ok(out)
    }
}

/// Identifies a client connection for exclude-cache bookkeeping.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct ClientId(pub Arc<str>);

imp_deref!(ClientId, Arc<str>);
imp_from!(ClientId, &str, s => ClientId(s.to_string().into_boxed_str().into()));
imp_from!(ClientId, String, s => ClientId(s.into_boxed_str().into()));

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
