// Behavior specs and per-step agent data decoded from Unity's output
use crate::communicator_objects::observation_proto::ObservationData;
use crate::communicator_objects::{
    AgentInfoProto, BrainParametersProto, ObservationProto, SpaceTypeProto,
};
use crate::error::{Result, UnityEnvironmentError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSpec {
    pub continuous_size: usize,
    pub discrete_branches: Vec<usize>,
}

impl ActionSpec {
    pub fn continuous(size: usize) -> Self {
        Self {
            continuous_size: size,
            discrete_branches: Vec::new(),
        }
    }

    pub fn discrete(branches: Vec<usize>) -> Self {
        Self {
            continuous_size: 0,
            discrete_branches: branches,
        }
    }

    pub fn discrete_size(&self) -> usize {
        self.discrete_branches.len()
    }

    /// Zero actions for `n_agents` agents.
    pub fn empty_action(&self, n_agents: usize) -> ActionTuple {
        ActionTuple {
            continuous: vec![vec![0.0; self.continuous_size]; n_agents],
            discrete: vec![vec![0; self.discrete_size()]; n_agents],
        }
    }

    /// Checks `actions` has one row per agent with the widths this spec expects.
    pub fn validate(&self, actions: &ActionTuple, n_agents: usize, behavior: &str) -> Result<()> {
        check_rows("continuous", &actions.continuous, self.continuous_size, n_agents, behavior)?;
        check_rows("discrete", &actions.discrete, self.discrete_size(), n_agents, behavior)?;
        for row in &actions.discrete {
            for (branch, (&action, &size)) in row.iter().zip(&self.discrete_branches).enumerate() {
                if action < 0 || action as usize >= size {
                    return Err(UnityEnvironmentError::InvalidAction {
                        behavior: behavior.to_string(),
                        reason: format!(
                            "discrete action {} out of range for branch {} of size {}",
                            action, branch, size
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    fn from_proto(brain: &BrainParametersProto) -> Self {
        let to_usize = |v: &i32| (*v).max(0) as usize;
        if let Some(spec) = &brain.action_spec {
            return Self {
                continuous_size: spec.num_continuous_actions.max(0) as usize,
                discrete_branches: spec.discrete_branch_sizes.iter().map(to_usize).collect(),
            };
        }
        // Older players only fill the deprecated vector action fields
        if brain.vector_action_space_type_deprecated == SpaceTypeProto::Continuous as i32 {
            let size = brain.vector_action_size_deprecated.first().map(to_usize);
            Self::continuous(size.unwrap_or(0))
        } else {
            Self::discrete(brain.vector_action_size_deprecated.iter().map(to_usize).collect())
        }
    }
}

fn check_rows<T>(
    kind: &str,
    rows: &[Vec<T>],
    width: usize,
    n_agents: usize,
    behavior: &str,
) -> Result<()> {
    let invalid = |reason: String| UnityEnvironmentError::InvalidAction {
        behavior: behavior.to_string(),
        reason,
    };
    if width == 0 {
        if rows.iter().any(|r| !r.is_empty()) {
            return Err(invalid(format!("behavior takes no {} actions", kind)));
        }
        return Ok(());
    }
    if rows.len() != n_agents {
        return Err(invalid(format!(
            "expected {} {} action rows, got {}",
            n_agents,
            kind,
            rows.len()
        )));
    }
    if let Some(row) = rows.iter().find(|r| r.len() != width) {
        return Err(invalid(format!(
            "expected {} {} actions per agent, got {}",
            width,
            kind,
            row.len()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionTuple {
    pub continuous: Vec<Vec<f32>>,
    pub discrete: Vec<Vec<i32>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationSpec {
    pub shape: Vec<usize>,
    pub name: String,
}

impl From<&ObservationProto> for ObservationSpec {
    fn from(obs: &ObservationProto) -> Self {
        Self {
            shape: obs.shape.iter().map(|d| (*d).max(0) as usize).collect(),
            name: obs.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehaviorSpec {
    pub observation_specs: Vec<ObservationSpec>,
    pub action_spec: ActionSpec,
}

impl BehaviorSpec {
    /// Observation shapes come from the first agent Unity reports, if any.
    pub fn from_proto(brain: &BrainParametersProto, agent: Option<&AgentInfoProto>) -> Self {
        Self {
            observation_specs: agent
                .map(|a| a.observations.iter().map(ObservationSpec::from).collect())
                .unwrap_or_default(),
            action_spec: ActionSpec::from_proto(brain),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Float(Vec<f32>),
    /// PNG bytes, left undecoded
    Compressed(Vec<u8>),
}

impl From<&ObservationProto> for Observation {
    fn from(obs: &ObservationProto) -> Self {
        match &obs.observation_data {
            Some(ObservationData::FloatData(fd)) => Observation::Float(fd.data.clone()),
            Some(ObservationData::CompressedData(bytes)) => Observation::Compressed(bytes.clone()),
            None => Observation::Float(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentStep {
    pub agent_id: i32,
    pub reward: f32,
    pub group_id: i32,
    pub group_reward: f32,
    /// Set on terminal steps when the episode hit its step limit
    pub interrupted: bool,
    pub action_mask: Vec<bool>,
    pub observations: Vec<Observation>,
}

impl AgentStep {
    /// All float observations concatenated in order
    pub fn flat_observation(&self) -> Vec<f32> {
        self.observations
            .iter()
            .filter_map(|o| match o {
                Observation::Float(data) => Some(data.as_slice()),
                Observation::Compressed(_) => None,
            })
            .flatten()
            .copied()
            .collect()
    }
}

impl From<&AgentInfoProto> for AgentStep {
    fn from(info: &AgentInfoProto) -> Self {
        Self {
            agent_id: info.id,
            reward: info.reward,
            group_id: info.group_id,
            group_reward: info.group_reward,
            interrupted: info.done && info.max_step_reached,
            action_mask: info.action_mask.clone(),
            observations: info.observations.iter().map(Observation::from).collect(),
        }
    }
}

/// Agents waiting for an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionSteps {
    pub agents: Vec<AgentStep>,
}

/// Agents whose episode ended during the last step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerminalSteps {
    pub agents: Vec<AgentStep>,
}

macro_rules! impl_steps {
    ($t:ty) => {
        impl $t {
            pub fn len(&self) -> usize {
                self.agents.len()
            }

            pub fn is_empty(&self) -> bool {
                self.agents.is_empty()
            }

            pub fn agent_ids(&self) -> Vec<i32> {
                self.agents.iter().map(|a| a.agent_id).collect()
            }

            pub fn get(&self, agent_id: i32) -> Option<&AgentStep> {
                self.agents.iter().find(|a| a.agent_id == agent_id)
            }
        }
    };
}

impl_steps!(DecisionSteps);
impl_steps!(TerminalSteps);

/// Splits Unity's agent infos into agents needing a decision and agents that are done.
pub fn steps_from_proto(infos: &[AgentInfoProto]) -> (DecisionSteps, TerminalSteps) {
    let (terminal, decision): (Vec<_>, Vec<_>) = infos.iter().partition(|info| info.done);
    (
        DecisionSteps {
            agents: decision.into_iter().map(AgentStep::from).collect(),
        },
        TerminalSteps {
            agents: terminal.into_iter().map(AgentStep::from).collect(),
        },
    )
}
