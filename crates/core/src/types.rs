use serde::{Deserialize, Serialize};

/// Task priority. The scheduler scans `High` queues first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// All priorities in dispatch order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Which kind of worker may run a task.
///
/// `Dedicated` tasks are bound to hardware and only run on workers flagged
/// dedicated-capable; `General` tasks run anywhere.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionClass {
    Dedicated,
    #[default]
    General,
}

impl ExecutionClass {
    pub const ALL: [ExecutionClass; 2] = [ExecutionClass::Dedicated, ExecutionClass::General];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for ExecutionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionClass::Dedicated => write!(f, "dedicated"),
            ExecutionClass::General => write!(f, "general"),
        }
    }
}

/// Opaque identifier for a buffer or resource a task reads or produces.
///
/// The scheduler only compares tokens; it never allocates, frees or
/// dereferences whatever they stand for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyToken(pub u64);

impl DependencyToken {
    /// Token derived from the address of a caller-owned value.
    pub fn of<T: ?Sized>(value: &T) -> Self {
        Self(value as *const T as *const () as usize as u64)
    }
}

impl From<u64> for DependencyToken {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for DependencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque identifier of the session or component a task belongs to.
///
/// `OwnerId::NONE` is the null owner: tasks may use it, but bulk waits on it
/// are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

impl OwnerId {
    pub const NONE: OwnerId = OwnerId(0);

    /// Owner derived from the address of a caller-owned session object.
    pub fn of<T: ?Sized>(value: &T) -> Self {
        Self(value as *const T as *const () as usize as u64)
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u64> for OwnerId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
