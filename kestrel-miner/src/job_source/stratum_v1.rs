//! Stratum v1 job source implementation.
//!
//! Bridges the Stratum v1 client into the job source abstraction: incoming
//! mining.notify messages become [`JobTemplate`]s, and [`Share`]s coming
//! back from the coordinator become protocol submissions. The protocol
//! state that outlives any one job (extranonce1, extranonce2 width, current
//! share difficulty) lives here.

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stratum_v1::{
    ClientEvent, JobNotification, PoolConfig, StratumV1Client, SubmitParams, SubmitQueue,
};
use crate::target::Target;

use super::{JobTemplate, Share, SourceCommand, SourceEvent};

/// Stratum v1 job source task.
pub struct StratumV1Source {
    /// Pool configuration
    config: PoolConfig,

    /// Where to send events to the coordinator
    event_tx: mpsc::Sender<SourceEvent>,

    /// Where to receive commands from the coordinator
    command_rx: mpsc::Receiver<SourceCommand>,

    /// Shutdown signal
    shutdown: CancellationToken,

    /// Protocol state from subscription
    state: Option<ProtocolState>,
}

/// Protocol state after a successful subscription.
#[derive(Debug, Clone)]
struct ProtocolState {
    extranonce1: Vec<u8>,
    extranonce2_size: usize,
    /// Current share difficulty from mining.set_difficulty
    share_difficulty: Option<u64>,
}

impl StratumV1Source {
    pub fn new(
        config: PoolConfig,
        command_rx: mpsc::Receiver<SourceCommand>,
        event_tx: mpsc::Sender<SourceEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            command_rx,
            shutdown,
            state: None,
        }
    }

    /// Convert a work notification into a job template using the stored
    /// protocol state.
    fn job_to_template(&self, job: JobNotification) -> Result<JobTemplate> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no protocol state (not subscribed)"))?;

        // Difficulty 1 until the pool says otherwise
        let share_difficulty = state.share_difficulty.unwrap_or(1);

        Ok(JobTemplate {
            id: job.job_id,
            prev_blockhash: job.prev_hash,
            version: job.version,
            bits: job.nbits,
            time: job.ntime,
            coinbase1: job.coinbase1,
            coinbase2: job.coinbase2,
            merkle_branches: job.merkle_branches,
            extranonce1: state.extranonce1.clone(),
            extranonce2_size: state.extranonce2_size,
            share_target: Target::from_difficulty(share_difficulty),
        })
    }

    fn share_to_submit_params(&self, share: Share) -> SubmitParams {
        SubmitParams {
            username: self.config.username.clone(),
            job_id: share.job_id,
            extranonce2: share.extranonce2,
            ntime: share.time,
            nonce: share.nonce,
            version_bits: share.version_bits,
            hash: share.hash,
            target: share.target,
        }
    }

    async fn handle_client_event(&mut self, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::Subscribed {
                extranonce1,
                extranonce2_size,
            } => {
                info!(
                    pool = %self.config.url,
                    extranonce1 = hex::encode(&extranonce1),
                    extranonce2_size,
                    "subscribed to pool"
                );
                self.state = Some(ProtocolState {
                    extranonce1,
                    extranonce2_size,
                    share_difficulty: None,
                });
            }

            ClientEvent::NewJob(job) => {
                debug!(job_id = %job.job_id, clean_jobs = job.clean_jobs, "job from pool");
                let clean = job.clean_jobs;
                let template = self.job_to_template(job)?;

                // clean_jobs invalidates all previous work
                let event = if clean {
                    SourceEvent::ReplaceJob(template)
                } else {
                    SourceEvent::UpdateJob(template)
                };
                self.event_tx.send(event).await?;
            }

            ClientEvent::DifficultyChanged(difficulty) => {
                info!(difficulty, "pool difficulty changed");
                if let Some(state) = &mut self.state {
                    state.share_difficulty = Some(difficulty);
                }
            }

            ClientEvent::VersionMaskSet(mask) => {
                debug!(mask = format!("{mask:#010x}"), "version mask set");
            }

            ClientEvent::ShareAccepted { job_id } => {
                info!(job_id = %job_id, "share accepted by pool");
            }

            ClientEvent::ShareRejected { job_id, reason } => {
                warn!(job_id = %job_id, reason = %reason, "share rejected by pool");
            }

            ClientEvent::Disconnected => {
                warn!(pool = %self.config.url, "disconnected from pool");
                self.event_tx.send(SourceEvent::ClearJobs).await?;
            }

            ClientEvent::Error(err) => {
                warn!(error = %err, "pool error");
            }
        }

        Ok(())
    }

    /// Run the source: spawn the protocol client and bridge between it and
    /// the job source interface until shutdown.
    pub async fn run(mut self) -> Result<()> {
        info!(pool = %self.config.url, user = %self.config.username, "starting stratum v1 source");

        let (client_event_tx, mut client_event_rx) = mpsc::channel(100);
        let client =
            StratumV1Client::new(self.config.clone(), client_event_tx, self.shutdown.clone());
        let shares: SubmitQueue = client.submit_queue();

        let client_handle = tokio::spawn(async move {
            if let Err(e) = client.run().await {
                warn!(error = %e, "stratum client error");
            }
        });

        loop {
            tokio::select! {
                Some(event) = client_event_rx.recv() => {
                    if let Err(e) = self.handle_client_event(event).await {
                        warn!(error = %e, "error handling client event");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SourceCommand::SubmitShare(share) => {
                            debug!(
                                job_id = %share.job_id,
                                nonce = format!("{:#010x}", share.nonce),
                                "submitting share to pool"
                            );
                            shares.push(self.share_to_submit_params(share));
                        }
                    }
                }

                _ = self.shutdown.cancelled() => {
                    info!(pool = %self.config.url, "stratum v1 source shutting down");
                    break;
                }
            }
        }

        client_handle.await?;
        Ok(())
    }
}
