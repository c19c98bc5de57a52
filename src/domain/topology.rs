//! Mapping of the coordinator/worker layout onto named channels
//!
//! Every participant derives the same topic strings from the same configuration. With `prefix`
//! being `fedml_<run>_`, the coordinator listens on `prefix + <worker>` for each worker and
//! talks to a worker on `prefix + 0_<worker>`, while a worker does the inverse. This emulates
//! one full-duplex point-to-point channel per worker on top of a broadcast medium.

use super::Message;
use crate::constants::{COORDINATOR_ID, TOPIC_PREFIX};
use thiserror::Error;

/// Errors raised while resolving topics
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TopologyError {
    /// Rank does not belong to the configured participants
    #[error("rank {rank} is out of range for {workers} workers")]
    RankOutOfRange {
        /// Offending rank
        rank: usize,
        /// Number of configured workers
        workers: usize,
    },
    /// Receiver is not reachable from this participant
    #[error("no route to receiver {0}")]
    UnknownReceiver(i64),
}

/// Function a participant fulfils in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Rank 0
    Coordinator,
    /// Any rank above zero
    Worker,
}

/// Immutable layout of a run as seen from one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    run_id: String,
    rank: usize,
    worker_ids: Vec<String>,
}

impl Topology {
    /// Creates a new topology
    ///
    /// `worker_ids` maps worker rank `r` to the external identifier at index `r - 1`. A worker
    /// which only knows about itself may pass just its own identifier together with rank 1.
    pub fn new(
        run_id: impl Into<String>,
        rank: usize,
        worker_ids: Vec<String>,
    ) -> Result<Self, TopologyError> {
        if rank > worker_ids.len() {
            return Err(TopologyError::RankOutOfRange {
                rank,
                workers: worker_ids.len(),
            });
        }

        Ok(Self {
            run_id: run_id.into(),
            rank,
            worker_ids,
        })
    }

    /// Identifier of the run
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Logical rank of the local participant
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Role derived from the local rank
    pub fn role(&self) -> Role {
        if self.rank == 0 {
            Role::Coordinator
        } else {
            Role::Worker
        }
    }

    /// External identifiers of all workers, ordered by rank
    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    /// Common prefix of every topic of the run
    pub fn prefix(&self) -> String {
        format!("{}{}_", TOPIC_PREFIX, self.run_id)
    }

    /// External identifier of the local participant, `None` for the coordinator
    pub fn local_external_id(&self) -> Option<&str> {
        match self.rank {
            0 => None,
            rank => self.worker_ids.get(rank - 1).map(String::as_str),
        }
    }

    fn inbound_topic(&self, worker: &str) -> String {
        format!("{}{}", self.prefix(), worker)
    }

    fn outbound_topic(&self, worker: &str) -> String {
        format!("{}{}_{}", self.prefix(), COORDINATOR_ID, worker)
    }

    /// Topics the local participant has to subscribe to
    pub fn subscribe_topics(&self) -> Vec<String> {
        match self.local_external_id() {
            None => self
                .worker_ids
                .iter()
                .map(|worker| self.inbound_topic(worker))
                .collect(),
            Some(own) => vec![self.outbound_topic(own)],
        }
    }

    /// Topics a message has to be published on to reach its receiver
    ///
    /// Receiver identities are the external identifiers of the workers. A broadcast sent by the
    /// coordinator fans out to every worker topic.
    pub fn publish_topics(&self, message: &Message) -> Result<Vec<String>, TopologyError> {
        match self.local_external_id() {
            None if message.is_broadcast() => Ok(self
                .worker_ids
                .iter()
                .map(|worker| self.outbound_topic(worker))
                .collect()),
            None => {
                let receiver = message.receiver_id().to_string();

                if self.worker_ids.contains(&receiver) {
                    Ok(vec![self.outbound_topic(&receiver)])
                } else {
                    Err(TopologyError::UnknownReceiver(message.receiver_id()))
                }
            }
            Some(own) => {
                if message.receiver_id() == COORDINATOR_ID || message.is_broadcast() {
                    Ok(vec![self.inbound_topic(own)])
                } else {
                    Err(TopologyError::UnknownReceiver(message.receiver_id()))
                }
            }
        }
    }

    /// Topic carrying run status updates
    pub fn status_topic(&self) -> String {
        format!("{}status", self.prefix())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::constants::BROADCAST_RECEIVER_ID;
    use pretty_assertions::assert_eq;

    fn workers(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn name_coordinator_topics() {
        let topology = Topology::new("42", 0, workers(&["7"])).unwrap();

        assert_eq!(topology.role(), Role::Coordinator);
        assert_eq!(topology.subscribe_topics(), vec!["fedml_42_7"]);
        assert_eq!(
            topology.publish_topics(&Message::new(0, 7, 1)).unwrap(),
            vec!["fedml_42_0_7"]
        );
    }

    #[test]
    fn name_worker_topics() {
        let topology = Topology::new("42", 1, workers(&["7"])).unwrap();

        assert_eq!(topology.role(), Role::Worker);
        assert_eq!(topology.local_external_id(), Some("7"));
        assert_eq!(topology.subscribe_topics(), vec!["fedml_42_0_7"]);
        assert_eq!(
            topology.publish_topics(&Message::new(7, 0, 1)).unwrap(),
            vec!["fedml_42_7"]
        );
    }

    #[test]
    fn fan_out_coordinator_broadcasts() {
        let topology = Topology::new("run", 0, workers(&["a", "b", "c"])).unwrap();
        let broadcast = Message::new(0, BROADCAST_RECEIVER_ID, 1);

        assert_eq!(
            topology.publish_topics(&broadcast).unwrap(),
            vec!["fedml_run_0_a", "fedml_run_0_b", "fedml_run_0_c"]
        );
    }

    #[test]
    fn reject_unknown_receivers() {
        let coordinator = Topology::new("42", 0, workers(&["1", "2"])).unwrap();
        let worker = Topology::new("42", 2, workers(&["1", "2"])).unwrap();

        assert_eq!(
            coordinator.publish_topics(&Message::new(0, 3, 1)),
            Err(TopologyError::UnknownReceiver(3))
        );
        assert_eq!(
            worker.publish_topics(&Message::new(2, 1, 1)),
            Err(TopologyError::UnknownReceiver(1))
        );
    }

    #[test]
    fn reject_ranks_without_worker() {
        assert_eq!(
            Topology::new("42", 3, workers(&["1", "2"])),
            Err(TopologyError::RankOutOfRange {
                rank: 3,
                workers: 2
            })
        );
    }

    #[test]
    fn name_the_status_topic() {
        let topology = Topology::new("42", 0, vec![]).unwrap();
        assert_eq!(topology.status_topic(), "fedml_42_status");
    }
}
