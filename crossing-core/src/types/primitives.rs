use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a vehicle, stable for the whole simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl AgentId {
    /// Position of this agent in per-agent vectors (connection table, outboxes).
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Config validation caps `agent_count` at `config::MAX_AGENTS`, so every
/// index handed out by a run fits.
impl From<usize> for AgentId {
    fn from(index: usize) -> Self {
        AgentId(index as u32)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "car-{}", self.0)
    }
}

/// Compass direction a vehicle approaches from or exits towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Heading {
    North,
    East,
    South,
    West,
}

impl Heading {
    pub fn opposite(self) -> Heading {
        match self {
            Heading::North => Heading::South,
            Heading::East => Heading::West,
            Heading::South => Heading::North,
            Heading::West => Heading::East,
        }
    }

    pub fn clockwise(self) -> Heading {
        match self {
            Heading::North => Heading::East,
            Heading::East => Heading::South,
            Heading::South => Heading::West,
            Heading::West => Heading::North,
        }
    }
}

impl fmt::Display for Heading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Heading::North => write!(f, "N"),
            Heading::East => write!(f, "E"),
            Heading::South => write!(f, "S"),
            Heading::West => write!(f, "W"),
        }
    }
}

/// The eight approach lanes of the intersection.
/// Each approach direction has a forward lane and a left-turn lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lane {
    NorthForward,
    NorthLeft,
    EastForward,
    EastLeft,
    SouthForward,
    SouthLeft,
    WestForward,
    WestLeft,
}

impl Lane {
    pub const COUNT: usize = 8;

    pub const ALL: [Lane; Lane::COUNT] = [
        Lane::NorthForward,
        Lane::NorthLeft,
        Lane::EastForward,
        Lane::EastLeft,
        Lane::SouthForward,
        Lane::SouthLeft,
        Lane::WestForward,
        Lane::WestLeft,
    ];

    /// Returns the numeric index for O(1) matrix lookup
    pub fn to_index(self) -> usize {
        match self {
            Lane::NorthForward => 0,
            Lane::NorthLeft => 1,
            Lane::EastForward => 2,
            Lane::EastLeft => 3,
            Lane::SouthForward => 4,
            Lane::SouthLeft => 5,
            Lane::WestForward => 6,
            Lane::WestLeft => 7,
        }
    }

    pub fn from_index(index: usize) -> Option<Lane> {
        Lane::ALL.get(index).copied()
    }

    pub fn approach(self) -> Heading {
        match self {
            Lane::NorthForward | Lane::NorthLeft => Heading::North,
            Lane::EastForward | Lane::EastLeft => Heading::East,
            Lane::SouthForward | Lane::SouthLeft => Heading::South,
            Lane::WestForward | Lane::WestLeft => Heading::West,
        }
    }

    pub fn is_left_turn(self) -> bool {
        matches!(
            self,
            Lane::NorthLeft | Lane::EastLeft | Lane::SouthLeft | Lane::WestLeft
        )
    }

    /// Where a vehicle in this lane leaves the intersection.
    /// Forward traffic exits opposite its approach; a left turn exits one step clockwise.
    pub fn exit_heading(self) -> Heading {
        if self.is_left_turn() {
            self.approach().clockwise()
        } else {
            self.approach().opposite()
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let turn = if self.is_left_turn() { "L" } else { "F" };
        write!(f, "{}{}", self.approach(), turn)
    }
}

/// Protocol status of a vehicle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentStatus {
    /// Has not asked to enter yet
    Idle,
    /// Request issued, collecting grants
    Waiting,
    /// Inside the intersection
    Passing,
    /// Released the intersection and left the network
    Exited,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "IDLE"),
            AgentStatus::Waiting => write!(f, "WAITING"),
            AgentStatus::Passing => write!(f, "PASSING"),
            AgentStatus::Exited => write!(f, "EXITED"),
        }
    }
}

/// Relay-side view of whether an agent is on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    NeverJoined,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::NeverJoined => write!(f, "NEVER_JOINED"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}
