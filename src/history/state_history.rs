use std::path::Path;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::file_io::read_if_exists;
use crate::file_io::write_atomically;
use crate::time::now_millis;
use crate::Error;
use crate::FsmState;
use crate::Result;
use crate::Role;

/// One recorded transition. Never modified once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaState {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub state: String,
}

impl HaState {
    pub fn new(state: FsmState) -> Self {
        Self {
            timestamp: now_millis(),
            state: state.name().to_string(),
        }
    }

    /// `None` for names this build does not know.
    pub fn fsm_state(&self) -> Option<FsmState> {
        FsmState::from_name(&self.state)
    }
}

/// Bounded, durable log of FSM states, one file per instance.
///
/// The file is a JSON array of [`HaState`], oldest first. Every write
/// replaces the whole file atomically.
#[derive(Debug)]
pub struct StateHistoryStore {
    path: PathBuf,
    max_stored_states: usize,
    states: Mutex<Vec<HaState>>,
}

impl StateHistoryStore {
    /// Loads the history at `path`. A missing or empty file is an empty
    /// history; an unreadable one is logged and replaced on the next write.
    pub fn open(
        path: impl AsRef<Path>,
        max_stored_states: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let states = match read_if_exists(&path)? {
            Some(bytes) if bytes.iter().any(|b| !b.is_ascii_whitespace()) => {
                match serde_json::from_slice::<Vec<HaState>>(&bytes) {
                    Ok(states) => states,
                    Err(e) => {
                        warn!("state history {:?} is unreadable, starting empty: {}", path, e);
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };
        debug!("loaded {} state(s) from {:?}", states.len(), path);

        Ok(Self {
            path,
            max_stored_states: max_stored_states.max(1),
            states: Mutex::new(states),
        })
    }

    /// Recovers the most recent state recorded for `role`, ignoring entries
    /// of the other role. With no such entry, records and returns `role`'s
    /// initial state.
    pub fn init(
        &self,
        role: Role,
    ) -> Result<HaState> {
        let initial = FsmState::init(role)
            .ok_or_else(|| Error::InvalidConfig("HA role is not configured".to_string()))?;

        let mut states = self.states.lock();
        let recovered = states
            .iter()
            .rev()
            .find(|entry| entry.fsm_state().map(FsmState::role) == Some(role))
            .cloned();

        if let Some(entry) = recovered {
            info!("recovered {} state {} from {:?}", role, entry.state, self.path);
            return Ok(entry);
        }

        let entry = HaState::new(initial);
        states.push(entry.clone());
        self.truncate_and_persist(&mut states)?;
        info!("seeded {} state history at {:?}", role, self.path);
        Ok(entry)
    }

    /// Appends `state` and persists the bounded history.
    pub fn update(
        &self,
        state: FsmState,
    ) -> Result<HaState> {
        let entry = HaState::new(state);
        let mut states = self.states.lock();
        states.push(entry.clone());
        self.truncate_and_persist(&mut states)?;
        Ok(entry)
    }

    pub fn states(&self) -> Vec<HaState> {
        self.states.lock().clone()
    }

    pub fn latest(&self) -> Option<HaState> {
        self.states.lock().last().cloned()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn truncate_and_persist(
        &self,
        states: &mut Vec<HaState>,
    ) -> Result<()> {
        if states.len() > self.max_stored_states {
            let excess = states.len() - self.max_stored_states;
            states.drain(..excess);
        }
        let bytes = serde_json::to_vec_pretty(&*states)?;
        write_atomically(&self.path, &bytes)
    }
}
