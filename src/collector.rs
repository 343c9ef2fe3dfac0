//! Trace-driven metrics aggregation.
//!
//! The collector turns the raw event stream from the tracing surface into per-flow sojourn
//! statistics, drop tallies, and peak-usage gauges. It is a pure consumer: feed it events (and
//! the current virtual time) from whatever thread drains the [`crate::trace::ChannelSink`]
//! receiver, then take serializable snapshots for dashboards or test assertions.

use crate::error::DropReason;
use crate::time::Time;
use crate::trace::TraceEvent;
use crossbeam_channel::Receiver;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// One completed packet residency, kept inside the sliding window.
#[derive(Debug, Clone, Copy)]
struct SojournSample {
    nanos: u64,
    at: Time,
}

/// Rolling statistics for one flow.
#[derive(Debug, Default)]
pub struct FlowMetrics {
    pub packets: u64,
    pub bytes: u64,
    pub drops: u64,
    samples: VecDeque<SojournSample>,
}

impl FlowMetrics {
    fn record(&mut self, sample: SojournSample, window: Duration) {
        self.samples.push_back(sample);
        let cutoff = Time::from_nanos(
            sample
                .at
                .as_nanos()
                .saturating_sub(window.as_nanos() as u64),
        );
        while let Some(front) = self.samples.front() {
            if front.at < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn percentile(sorted: &[u64], pct: f64) -> Option<u64> {
        if sorted.is_empty() {
            return None;
        }
        let idx = ((sorted.len() as f64 * pct / 100.0).ceil() as usize)
            .saturating_sub(1)
            .min(sorted.len() - 1);
        Some(sorted[idx])
    }

    fn snapshot(&self, flow_hash: u32) -> FlowSnapshot {
        let mut sorted: Vec<u64> = self.samples.iter().map(|s| s.nanos).collect();
        sorted.sort_unstable();
        let mean = if sorted.is_empty() {
            None
        } else {
            Some(sorted.iter().sum::<u64>() / sorted.len() as u64)
        };
        FlowSnapshot {
            flow_hash,
            packets: self.packets,
            bytes: self.bytes,
            drops: self.drops,
            sojourn_mean_ns: mean,
            sojourn_p50_ns: Self::percentile(&sorted, 50.0),
            sojourn_p99_ns: Self::percentile(&sorted, 99.0),
        }
    }
}

/// Per-flow view inside a [`CollectorSnapshot`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct FlowSnapshot {
    pub flow_hash: u32,
    pub packets: u64,
    pub bytes: u64,
    pub drops: u64,
    pub sojourn_mean_ns: Option<u64>,
    pub sojourn_p50_ns: Option<u64>,
    pub sojourn_p99_ns: Option<u64>,
}

/// Point-in-time aggregate over everything the collector has seen.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollectorSnapshot {
    /// Flows sorted by hash for stable output.
    pub flows: Vec<FlowSnapshot>,
    pub dropped_buffer_full: u64,
    pub dropped_tree_reject: u64,
    /// Highest bytes-in-use observed per partition.
    pub partition_peaks: Vec<u32>,
    /// Highest packet gauge observed per node.
    pub occupancy_peaks: Vec<u32>,
}

/// Aggregates trace events into flow and resource statistics.
///
/// Sojourn time is measured from the packet-enqueued event to the packet-dequeued event in
/// virtual time, so the collector needs `now` alongside each batch of events.
pub struct MetricsCollector {
    window: Duration,
    inflight: HashMap<u64, (Time, u32)>,
    flows: HashMap<u32, FlowMetrics>,
    dropped_buffer_full: u64,
    dropped_tree_reject: u64,
    partition_used: Vec<u32>,
    partition_peaks: Vec<u32>,
    occupancy_peaks: Vec<u32>,
}

impl MetricsCollector {
    /// `window` bounds how much sojourn history feeds the percentiles.
    pub fn new(window: Duration) -> MetricsCollector {
        MetricsCollector {
            window,
            inflight: HashMap::new(),
            flows: HashMap::new(),
            dropped_buffer_full: 0,
            dropped_tree_reject: 0,
            partition_used: Vec::new(),
            partition_peaks: Vec::new(),
            occupancy_peaks: Vec::new(),
        }
    }

    /// Fold one event into the aggregates.
    pub fn observe(&mut self, event: &TraceEvent, now: Time) {
        match event {
            TraceEvent::PacketEnqueued {
                packet_id,
                sched_meta,
            } => {
                self.inflight
                    .insert(*packet_id, (now, sched_meta.flow_hash));
                let flow = self.flows.entry(sched_meta.flow_hash).or_default();
                flow.packets += 1;
                flow.bytes += sched_meta.pkt_len as u64;
            }
            TraceEvent::PacketDequeued {
                packet_id,
                sched_meta,
            } => {
                if let Some((entered, flow_hash)) = self.inflight.remove(packet_id) {
                    let sample = SojournSample {
                        nanos: now.saturating_since(entered),
                        at: now,
                    };
                    self.flows
                        .entry(flow_hash)
                        .or_default()
                        .record(sample, self.window);
                } else {
                    // Dequeue without a matching enqueue: the collector joined mid-stream.
                    self.flows.entry(sched_meta.flow_hash).or_default();
                }
            }
            TraceEvent::PacketDropped {
                packet_id,
                flow_hash,
                reason,
                ..
            } => {
                self.inflight.remove(packet_id);
                self.flows.entry(*flow_hash).or_default().drops += 1;
                match reason {
                    DropReason::BufferFull => self.dropped_buffer_full += 1,
                    DropReason::TreeReject => self.dropped_tree_reject += 1,
                }
            }
            TraceEvent::BufferEnqueue {
                partition_id,
                pkt_len,
            } => {
                self.ensure_partition(*partition_id);
                let idx = *partition_id as usize;
                self.partition_used[idx] += pkt_len;
                self.partition_peaks[idx] = self.partition_peaks[idx].max(self.partition_used[idx]);
            }
            TraceEvent::BufferDequeue {
                partition_id,
                pkt_len,
            } => {
                self.ensure_partition(*partition_id);
                let idx = *partition_id as usize;
                self.partition_used[idx] = self.partition_used[idx].saturating_sub(*pkt_len);
            }
            TraceEvent::BufferDrop { .. } => {}
            TraceEvent::EnqTrace { .. } | TraceEvent::DeqTrace { .. } => {}
            TraceEvent::NodeOccupancy { node, packets } => {
                let idx = *node as usize;
                if self.occupancy_peaks.len() <= idx {
                    self.occupancy_peaks.resize(idx + 1, 0);
                }
                self.occupancy_peaks[idx] = self.occupancy_peaks[idx].max(*packets);
            }
        }
    }

    fn ensure_partition(&mut self, partition_id: u32) {
        let idx = partition_id as usize;
        if self.partition_peaks.len() <= idx {
            self.partition_peaks.resize(idx + 1, 0);
            self.partition_used.resize(idx + 1, 0);
        }
    }

    /// Drain every event currently queued on `rx`.
    pub fn drain(&mut self, rx: &Receiver<TraceEvent>, now: Time) {
        for event in rx.try_iter() {
            self.observe(&event, now);
        }
    }

    /// Packets currently between their enqueue and dequeue events.
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    pub fn snapshot(&self) -> CollectorSnapshot {
        let mut flows: Vec<FlowSnapshot> = self
            .flows
            .iter()
            .map(|(&hash, metrics)| metrics.snapshot(hash))
            .collect();
        flows.sort_by_key(|f| f.flow_hash);
        CollectorSnapshot {
            flows,
            dropped_buffer_full: self.dropped_buffer_full,
            dropped_tree_reject: self.dropped_tree_reject,
            partition_peaks: self.partition_peaks.clone(),
            occupancy_peaks: self.occupancy_peaks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::SchedMeta;

    fn meta(flow_hash: u32, pkt_len: u32) -> SchedMeta {
        SchedMeta {
            pkt_len,
            flow_hash,
            ..SchedMeta::default()
        }
    }

    #[test]
    fn sojourn_is_measured_between_enqueue_and_dequeue() {
        let mut collector = MetricsCollector::new(Duration::from_secs(10));
        collector.observe(
            &TraceEvent::PacketEnqueued {
                packet_id: 1,
                sched_meta: meta(7, 100),
            },
            Time::from_nanos(1000),
        );
        collector.observe(
            &TraceEvent::PacketDequeued {
                packet_id: 1,
                sched_meta: meta(7, 100),
            },
            Time::from_nanos(4000),
        );

        let snap = collector.snapshot();
        assert_eq!(snap.flows.len(), 1);
        let flow = &snap.flows[0];
        assert_eq!(flow.flow_hash, 7);
        assert_eq!(flow.packets, 1);
        assert_eq!(flow.bytes, 100);
        assert_eq!(flow.sojourn_p50_ns, Some(3000));
        assert_eq!(collector.inflight(), 0);
    }

    #[test]
    fn drops_are_tallied_per_flow_and_reason() {
        let mut collector = MetricsCollector::new(Duration::from_secs(10));
        collector.observe(
            &TraceEvent::PacketDropped {
                packet_id: 2,
                flow_hash: 3,
                pkt_len: 50,
                reason: DropReason::BufferFull,
            },
            Time::ZERO,
        );
        collector.observe(
            &TraceEvent::PacketDropped {
                packet_id: 3,
                flow_hash: 3,
                pkt_len: 50,
                reason: DropReason::TreeReject,
            },
            Time::ZERO,
        );

        let snap = collector.snapshot();
        assert_eq!(snap.dropped_buffer_full, 1);
        assert_eq!(snap.dropped_tree_reject, 1);
        assert_eq!(snap.flows[0].drops, 2);
    }

    #[test]
    fn occupancy_peaks_track_the_high_water_mark() {
        let mut collector = MetricsCollector::new(Duration::from_secs(10));
        for packets in [1u32, 3, 2] {
            collector.observe(&TraceEvent::NodeOccupancy { node: 1, packets }, Time::ZERO);
        }
        assert_eq!(collector.snapshot().occupancy_peaks, vec![0, 3]);
    }

    #[test]
    fn old_samples_age_out_of_the_window() {
        let mut collector = MetricsCollector::new(Duration::from_nanos(100));
        for (id, enq_at, deq_at) in [(1u64, 0u64, 10u64), (2, 50, 60), (3, 500, 520)] {
            collector.observe(
                &TraceEvent::PacketEnqueued {
                    packet_id: id,
                    sched_meta: meta(1, 10),
                },
                Time::from_nanos(enq_at),
            );
            collector.observe(
                &TraceEvent::PacketDequeued {
                    packet_id: id,
                    sched_meta: meta(1, 10),
                },
                Time::from_nanos(deq_at),
            );
        }
        let snap = collector.snapshot();
        // The 10ns completions are far outside the 100ns window by t=520, so only the last
        // sample (20ns) feeds the percentiles; the lifetime packet count is unaffected.
        assert_eq!(snap.flows[0].sojourn_p50_ns, Some(20));
        assert_eq!(snap.flows[0].packets, 3);
    }
}
