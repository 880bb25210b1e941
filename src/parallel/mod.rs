//! Batch filtering worker pool
//!
//! Filtering passes are independent, so bulk work (replaying a backlog,
//! re-filtering history) fans out over a bounded worker pool. Workers share
//! one immutable [`FilterEngine`] reference; results come back in submission
//! order.

use anyhow::{Result, anyhow};
use crossbeam::channel::bounded;

use crate::cache::ActorRef;
use crate::filter::{FilterEngine, PassOutcome};

/// One message queued for a batch run.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub text: String,
    pub actor: Option<ActorRef>,
}

/// Worker-pool sizing knobs.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Hard cap on worker threads (0 = percentage-based only).
    pub max_workers: usize,
    /// Percentage of CPU cores to use (1-100).
    pub thread_percentage: u8,
    /// Channel buffer size multiplier (buffer = workers * multiplier).
    pub buffer_multiplier: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: 0,
            thread_percentage: 75,
            buffer_multiplier: 2,
        }
    }
}

impl BatchOptions {
    /// Pool options honoring the engine settings' worker cap.
    pub fn from_settings(settings: &crate::config::EngineSettings) -> Self {
        Self {
            max_workers: settings.max_workers,
            ..Self::default()
        }
    }
}

/// Worker count for a given batch size: percentage of cores, capped by
/// `max_workers` when set, never more workers than messages.
pub fn optimal_workers(options: &BatchOptions, work_count: usize) -> usize {
    let cores = num_cpus::get();
    let by_percentage = std::cmp::max(1, (cores * options.thread_percentage as usize) / 100);
    let cap = if options.max_workers > 0 {
        std::cmp::min(options.max_workers, by_percentage)
    } else {
        by_percentage
    };
    std::cmp::min(cap, work_count.max(1))
}

/// Run one filtering pass per message across the pool, returning outcomes in
/// submission order.
pub fn process_batch(
    engine: &FilterEngine,
    messages: Vec<InboundMessage>,
    options: &BatchOptions,
) -> Result<Vec<PassOutcome>> {
    let work_count = messages.len();
    if work_count == 0 {
        return Ok(Vec::new());
    }

    let workers = optimal_workers(options, work_count);
    let (work_tx, work_rx) = bounded::<(usize, InboundMessage)>(workers * options.buffer_multiplier);
    let (result_tx, result_rx) =
        bounded::<(usize, PassOutcome)>(workers * options.buffer_multiplier * 2);

    let mut indexed = crossbeam::thread::scope(|s| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            s.spawn(move |_| {
                while let Ok((index, message)) = work_rx.recv() {
                    let outcome = engine.process(&message.text, message.actor);
                    if result_tx.send((index, outcome)).is_err() {
                        break; // Receiver dropped
                    }
                }
            });
        }

        // Producer: feed the pool, then close the work channel.
        let producer_tx = work_tx.clone();
        s.spawn(move |_| {
            for item in messages.into_iter().enumerate() {
                if producer_tx.send(item).is_err() {
                    break; // Workers dropped
                }
            }
        });

        // Drop the original senders so receivers know when work is done
        drop(work_tx);
        drop(result_tx);

        let mut results = Vec::with_capacity(work_count);
        while let Ok(result) = result_rx.recv() {
            results.push(result);
            if results.len() >= work_count {
                break;
            }
        }
        results
    })
    .map_err(|_| anyhow!("worker panic during batch filtering"))?;

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, outcome)| outcome).collect())
}
