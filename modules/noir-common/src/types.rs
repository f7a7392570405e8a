use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// --- Entities ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Event,
    Location,
    Object,
}

impl EntityType {
    /// Collapse graph node labels into the fixed entity type set.
    /// The first recognised label wins; unrecognised labels are objects.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        labels
            .iter()
            .find_map(|l| Self::from_label(l.as_ref()))
            .unwrap_or(EntityType::Object)
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "Person" | "Rapper" | "Producer" | "Artist" => Some(EntityType::Person),
            "Organization" | "Gang" | "Label" | "Company" => Some(EntityType::Organization),
            "Event" => Some(EntityType::Event),
            "Location" | "Place" | "City" => Some(EntityType::Location),
            "Object" | "Vehicle" | "Weapon" => Some(EntityType::Object),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Person => write!(f, "Person"),
            EntityType::Organization => write!(f, "Organization"),
            EntityType::Event => write!(f, "Event"),
            EntityType::Location => write!(f, "Location"),
            EntityType::Object => write!(f, "Object"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Entity {
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            entity_type,
            aliases: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Canonical id followed by every alias.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Case-insensitive substring match against the id and aliases.
    /// A blank fragment matches nothing.
    pub fn matches_fragment(&self, fragment: &str) -> bool {
        let needle = fragment.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.names().any(|n| n.to_lowercase().contains(&needle))
    }
}

// --- Roles ---

/// Severity tier of a relation type. Declared from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleClass {
    Executor,
    Mastermind,
    Accomplice,
    Suspect,
}

impl RoleClass {
    pub const ALL: [RoleClass; 4] = [
        RoleClass::Executor,
        RoleClass::Mastermind,
        RoleClass::Accomplice,
        RoleClass::Suspect,
    ];

    /// Higher is more severe.
    pub fn severity(self) -> u8 {
        match self {
            RoleClass::Executor => 3,
            RoleClass::Mastermind => 2,
            RoleClass::Accomplice => 1,
            RoleClass::Suspect => 0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "executor" => Some(RoleClass::Executor),
            "mastermind" => Some(RoleClass::Mastermind),
            "accomplice" => Some(RoleClass::Accomplice),
            "suspect" => Some(RoleClass::Suspect),
            _ => None,
        }
    }
}

impl fmt::Display for RoleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleClass::Executor => write!(f, "executor"),
            RoleClass::Mastermind => write!(f, "mastermind"),
            RoleClass::Accomplice => write!(f, "accomplice"),
            RoleClass::Suspect => write!(f, "suspect"),
        }
    }
}

// --- Relations ---

/// One directed edge as read from the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationInstance {
    pub source: String,
    pub relation: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Store-assigned element id, when the store exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl RelationInstance {
    pub fn new(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            relation: relation.into(),
            target: target.into(),
            attributes: BTreeMap::new(),
            handle: None,
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    /// Date of the relation from its `date` attribute, falling back to `year`.
    pub fn date(&self) -> Option<NaiveDate> {
        self.attributes
            .get("date")
            .and_then(|d| parse_loose_date(d))
            .or_else(|| self.attributes.get("year").and_then(|y| parse_loose_date(y)))
    }

    /// Two instances are the same piece of evidence when their handles agree,
    /// or, lacking handles, when endpoints, type and attributes all agree.
    pub fn same_evidence(&self, other: &RelationInstance) -> bool {
        match (&self.handle, &other.handle) {
            (Some(a), Some(b)) => a == b,
            _ => {
                self.source == other.source
                    && self.relation == other.relation
                    && self.target == other.target
                    && self.attributes == other.attributes
            }
        }
    }
}

impl fmt::Display for RelationInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[:{}]-> {}", self.source, self.relation, self.target)
    }
}

/// Parse `YYYY-MM-DD`, `YYYY-MM` or `YYYY`. Partial dates resolve to the
/// first day of the period.
pub fn parse_loose_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    let mut parts = s.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    if !(1..=9999).contains(&year) {
        return None;
    }
    let month: u32 = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 1,
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}

// --- Evidence chains ---

/// Ordered hops ending at the entity under investigation. Never empty and
/// always connected; deserialization enforces the same rules as `from_hops`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChainRecord")]
pub struct EvidenceChain {
    hops: Vec<RelationInstance>,
}

#[derive(Deserialize)]
struct ChainRecord {
    hops: Vec<RelationInstance>,
}

impl TryFrom<ChainRecord> for EvidenceChain {
    type Error = String;

    fn try_from(record: ChainRecord) -> Result<Self, Self::Error> {
        EvidenceChain::from_hops(record.hops)
            .ok_or_else(|| "evidence chain must be a non-empty connected path".to_string())
    }
}

impl EvidenceChain {
    pub fn direct(relation: RelationInstance) -> Self {
        Self {
            hops: vec![relation],
        }
    }

    /// Build a chain, rejecting empty or disconnected hop sequences.
    pub fn from_hops(hops: Vec<RelationInstance>) -> Option<Self> {
        if hops.is_empty() {
            return None;
        }
        if hops.windows(2).any(|w| w[0].target != w[1].source) {
            return None;
        }
        Some(Self { hops })
    }

    pub fn hops(&self) -> &[RelationInstance] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn is_direct(&self) -> bool {
        self.hops.len() == 1
    }

    /// The implicated candidate: the first hop's source.
    pub fn suspect(&self) -> &str {
        &self.hops[0].source
    }

    /// The entity the chain converges on: the last hop's target.
    pub fn target(&self) -> &str {
        &self.hops[self.hops.len() - 1].target
    }

    pub fn first_hop(&self) -> &RelationInstance {
        &self.hops[0]
    }

    /// Entity ids in path order.
    pub fn entities(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.hops.iter().map(|h| h.source.as_str()).collect();
        ids.push(self.target());
        ids
    }

    /// True when no entity appears twice along the path.
    pub fn is_simple(&self) -> bool {
        let ids = self.entities();
        let mut seen = std::collections::HashSet::with_capacity(ids.len());
        ids.into_iter().all(|id| seen.insert(id))
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.hops.iter().filter_map(RelationInstance::date).max()
    }

    pub fn same_evidence(&self, other: &EvidenceChain) -> bool {
        self.hops.len() == other.hops.len()
            && self
                .hops
                .iter()
                .zip(other.hops.iter())
                .all(|(a, b)| a.same_evidence(b))
    }

    /// `A -[:REL]-> B -[:REL]-> C`
    pub fn render(&self) -> String {
        let mut out = self.hops[0].source.clone();
        for hop in &self.hops {
            out.push_str(" -[:");
            out.push_str(&hop.relation);
            out.push_str("]-> ");
            out.push_str(&hop.target);
        }
        out
    }
}

impl fmt::Display for EvidenceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
