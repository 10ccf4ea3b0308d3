//! Per-group counter accumulation across process churn.
//!
//! Kernel counters are cumulative per process and disappear with it. The
//! accumulator keeps the last observed counters of every live identity and,
//! when an identity goes away, folds them into a durable per-group baseline.
//! A group's exported counter is `baseline + sum(live contributions)`, which
//! never decreases.
//!
//! A retired identity stays dormant until it has been missing from two
//! consecutive snapshots (or for as long as it is present but unmatched). If
//! it comes back in the meantime, the usage already folded becomes its offset
//! and is not credited again.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::group::walker::Classification;
use crate::process::{Counts, Memory, ProcAttributes, ProcIdentity, States};

/// Identity of a thread across scrapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadIdentity {
    pub pid: u32,
    pub tid: u32,
    pub start_time: u64,
}

/// (group name, thread name)
pub type ThreadKey = (Arc<str>, Arc<str>);

/// State kept for one live identity.
#[derive(Debug, Clone)]
pub struct Tracked<K> {
    pub key: K,
    /// Last observed absolute counters.
    pub last: Counts,
    /// Counters already credited to a baseline (after a migration or a return).
    pub offset: Counts,
    pub last_seen: DateTime<Utc>,
}

impl<K> Tracked<K> {
    /// What this identity currently adds to its key's total.
    pub fn contribution(&self) -> Counts {
        self.last.saturating_sub(&self.offset)
    }
}

/// A tracked process: its group plus last counters.
pub type TrackedProcess = Tracked<Arc<str>>;

/// A retired identity kept around so that its reappearance does not credit
/// its folded usage a second time.
#[derive(Debug, Clone)]
struct Dormant<K> {
    tracked: Tracked<K>,
    /// Missing from the latest snapshot. A dormant entry missing twice is dropped.
    absent: bool,
}

/// Live identities and per-key baselines for one kind of entity.
#[derive(Debug, Clone)]
pub struct Ledger<I, K> {
    live: HashMap<I, Tracked<K>>,
    dormant: HashMap<I, Dormant<K>>,
    baselines: BTreeMap<K, Counts>,
}

impl<I, K> Default for Ledger<I, K> {
    fn default() -> Self {
        Self {
            live: HashMap::new(),
            dormant: HashMap::new(),
            baselines: BTreeMap::new(),
        }
    }
}

impl<I, K> Ledger<I, K>
where
    I: Eq + Hash + Copy,
    K: Ord + Clone,
{
    /// Records the counters of `id` under `key` for this scrape.
    pub fn observe(&mut self, id: I, key: K, counts: Counts, now: DateTime<Utc>) {
        if !self.baselines.contains_key(&key) {
            self.baselines.insert(key.clone(), Counts::default());
        }
        if let Some(t) = self.live.get_mut(&id) {
            if t.key != key {
                // Usage up to the previous scrape stays with the old key;
                // the new key only sees what accrues from here on.
                let moved = t.contribution();
                *self.baselines.entry(t.key.clone()).or_default() += moved;
                t.offset = t.last;
                t.key = key;
            }
            // Kernel counters never go back within one identity.
            t.last = t.last.fieldwise_max(&counts);
            t.last_seen = now;
            return;
        }
        let tracked = match self.dormant.remove(&id) {
            // Everything up to `last` is already in a baseline.
            Some(Dormant { tracked: t, .. }) => Tracked {
                key,
                last: t.last.fieldwise_max(&counts),
                offset: t.last,
                last_seen: now,
            },
            None => Tracked {
                key,
                last: counts,
                offset: Counts::default(),
                last_seen: now,
            },
        };
        self.live.insert(id, tracked);
    }

    /// Folds `id`'s contribution into its key's baseline and keeps it dormant.
    fn retire(&mut self, id: &I, absent: bool) -> Option<K> {
        let t = self.live.remove(id)?;
        *self.baselines.entry(t.key.clone()).or_default() += t.contribution();
        let key = t.key.clone();
        self.dormant.insert(*id, Dormant { tracked: t, absent });
        Some(key)
    }

    /// Takes a still-present identity out of its key, e.g. when it no longer
    /// matches. `counts` is its current reading; usage from here on is
    /// credited nowhere. Returns the key it left, if it was live.
    pub fn park(&mut self, id: I, counts: Counts, now: DateTime<Utc>) -> Option<K> {
        let key = self.retire(&id, false);
        if let Some(d) = self.dormant.get_mut(&id) {
            d.tracked.last = d.tracked.last.fieldwise_max(&counts);
            d.tracked.last_seen = now;
            d.absent = false;
        }
        key
    }

    /// Retires every live identity not in `seen` and drops dormant identities
    /// that stayed away for a second scrape. Returns how many were retired.
    pub fn retire_unseen(&mut self, seen: &HashSet<I>) -> usize {
        self.dormant.retain(|id, d| {
            if seen.contains(id) {
                d.absent = false;
                true
            } else {
                !std::mem::replace(&mut d.absent, true)
            }
        });
        let gone: Vec<I> = self
            .live
            .keys()
            .filter(|id| !seen.contains(*id))
            .copied()
            .collect();
        for id in &gone {
            self.retire(id, true);
        }
        gone.len()
    }

    pub fn get(&self, id: &I) -> Option<&Tracked<K>> {
        self.live.get(id)
    }

    /// A retired identity that may still come back.
    pub fn dormant(&self, id: &I) -> Option<&Tracked<K>> {
        self.dormant.get(id).map(|d| &d.tracked)
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn baseline(&self, key: &K) -> Option<&Counts> {
        self.baselines.get(key)
    }

    /// `baseline + sum(live contributions)` for every key ever seen.
    pub fn totals(&self) -> BTreeMap<K, Counts> {
        let mut out = self.baselines.clone();
        for t in self.live.values() {
            *out.entry(t.key.clone()).or_default() += t.contribution();
        }
        out
    }
}

/// Exported values of one group for one scrape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupCounts {
    /// Cumulative counters, monotonic across scrapes.
    pub counts: Counts,
    pub procs: u64,
    pub memory: Memory,
    pub open_fds: u64,
    /// Highest open/limit ratio among live members.
    pub worst_fd_ratio: f64,
    pub num_threads: u64,
    pub states: States,
    /// Start time (ticks after boot) of the oldest live member.
    pub oldest_start_time: Option<u64>,
}

/// Exported values of one (group, thread name) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadCounts {
    pub counts: Counts,
    /// Live threads with this name.
    pub threads: u64,
}

/// Result of one accumulation step.
#[derive(Debug, Clone, Default)]
pub struct GroupReport {
    pub groups: BTreeMap<Arc<str>, GroupCounts>,
    pub threads: BTreeMap<ThreadKey, ThreadCounts>,
    /// Position of this step among all steps of the accumulator, starting at 1.
    pub sequence: u64,
}

/// Durable per-group state across scrapes.
#[derive(Debug, Default)]
pub struct GroupAccumulator {
    procs: Ledger<ProcIdentity, Arc<str>>,
    threads: Ledger<ThreadIdentity, ThreadKey>,
    ignored: HashSet<ProcIdentity>,
    updates: u64,
}

impl GroupAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classification remembered for an identity, if any.
    pub fn prior(&self, id: &ProcIdentity) -> Option<Classification> {
        if let Some(t) = self.procs.get(id) {
            return Some(Classification::Group(Arc::clone(&t.key)));
        }
        if self.ignored.contains(id) {
            return Some(Classification::Unmatched);
        }
        // Missed by the last snapshot but not yet counted as exited.
        self.procs
            .dormant(id)
            .map(|t| Classification::Group(Arc::clone(&t.key)))
    }

    pub fn tracked(&self, id: &ProcIdentity) -> Option<&TrackedProcess> {
        self.procs.get(id)
    }

    pub fn tracked_len(&self) -> usize {
        self.procs.live_len()
    }

    /// Accumulated baseline of a group (counters of retired members).
    pub fn baseline(&self, group: &str) -> Option<Counts> {
        self.procs.baseline(&Arc::from(group)).copied()
    }

    /// Reconciles a snapshot with the retained state and returns this scrape's
    /// per-group values. `groups` maps pid to group for matched processes.
    pub fn update(
        &mut self,
        procs: &[ProcAttributes],
        groups: &HashMap<u32, Arc<str>>,
        now: DateTime<Utc>,
    ) -> GroupReport {
        let mut seen: HashSet<ProcIdentity> = HashSet::with_capacity(procs.len());
        let mut seen_threads: HashSet<ThreadIdentity> = HashSet::new();
        let mut gauges: BTreeMap<Arc<str>, GroupCounts> = BTreeMap::new();
        let mut live_threads: BTreeMap<ThreadKey, u64> = BTreeMap::new();

        for p in procs {
            let id = p.identity();
            seen.insert(id);

            let Some(group) = groups.get(&p.pid) else {
                if let Some(group) = self.procs.park(id, p.counts, now) {
                    debug!("pid {} no longer matches, leaving group {}", p.pid, group);
                }
                self.ignored.insert(id);
                continue;
            };
            self.ignored.remove(&id);

            if let Some(t) = self.procs.get(&id) {
                if t.key != *group {
                    debug!("pid {} moved from group {} to {}", p.pid, t.key, group);
                }
            } else {
                trace!("tracking pid {} in group {}", p.pid, group);
            }
            self.procs.observe(id, Arc::clone(group), p.counts, now);

            let g = gauges.entry(Arc::clone(group)).or_default();
            g.procs += 1;
            g.memory += p.memory;
            g.open_fds += p.filedesc.open;
            if p.filedesc.limit > 0 {
                let ratio = p.filedesc.open as f64 / p.filedesc.limit as f64;
                if ratio > g.worst_fd_ratio {
                    g.worst_fd_ratio = ratio;
                }
            }
            g.num_threads += p.num_threads;
            g.states.record(p.state);
            g.oldest_start_time = Some(match g.oldest_start_time {
                Some(t) => t.min(p.start_time),
                None => p.start_time,
            });

            for th in &p.threads {
                let tid = ThreadIdentity {
                    pid: p.pid,
                    tid: th.tid,
                    start_time: th.start_time,
                };
                seen_threads.insert(tid);
                let key: ThreadKey = (Arc::clone(group), Arc::from(th.name.as_str()));
                *live_threads.entry(key.clone()).or_default() += 1;
                self.threads.observe(tid, key, th.counts, now);
            }
        }

        let exited = self.procs.retire_unseen(&seen);
        if exited > 0 {
            debug!("{} tracked processes exited", exited);
        }
        self.ignored.retain(|id| seen.contains(id));
        self.threads.retire_unseen(&seen_threads);

        self.updates += 1;
        let mut report = GroupReport {
            sequence: self.updates,
            ..Default::default()
        };
        for (group, counts) in self.procs.totals() {
            let mut g = gauges.remove(&group).unwrap_or_default();
            g.counts = counts;
            report.groups.insert(group, g);
        }
        for (key, counts) in self.threads.totals() {
            let threads = live_threads.get(&key).copied().unwrap_or(0);
            report.threads.insert(key, ThreadCounts { counts, threads });
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Filedesc, ThreadAttributes};

    fn proc(pid: u32, start_time: u64, cpu: u64) -> ProcAttributes {
        ProcAttributes {
            pid,
            ppid: 1,
            start_time,
            name: "job".into(),
            counts: Counts {
                cpu_user_ticks: cpu,
                ..Default::default()
            },
            num_threads: 1,
            ..Default::default()
        }
    }

    fn assign(pairs: &[(u32, &Arc<str>)]) -> HashMap<u32, Arc<str>> {
        pairs.iter().map(|(pid, g)| (*pid, Arc::clone(g))).collect()
    }

    fn cpu(report: &GroupReport, group: &str) -> u64 {
        report.groups[group].counts.cpu_user_ticks
    }

    #[test]
    fn test_exit_folds_into_baseline_and_pid_reuse_is_new_identity() {
        let batch: Arc<str> = Arc::from("batch");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();

        let r1 = acc.update(&[proc(5, 1000, 10)], &assign(&[(5, &batch)]), now);
        assert_eq!(cpu(&r1, "batch"), 10);
        assert_eq!(r1.groups["batch"].procs, 1);

        let r2 = acc.update(&[], &HashMap::new(), now);
        assert_eq!(acc.baseline("batch").unwrap().cpu_user_ticks, 10);
        assert_eq!(cpu(&r2, "batch"), 10);
        assert_eq!(r2.groups["batch"].procs, 0);

        let r3 = acc.update(&[proc(5, 1001, 1)], &assign(&[(5, &batch)]), now);
        assert_eq!(cpu(&r3, "batch"), 11);
        let t = acc
            .tracked(&ProcIdentity {
                pid: 5,
                start_time: 1001,
            })
            .unwrap();
        assert_eq!(t.last.cpu_user_ticks, 1);
    }

    #[test]
    fn test_pid_reuse_within_one_scrape_gap() {
        let g: Arc<str> = Arc::from("g");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();
        acc.update(&[proc(9, 100, 50)], &assign(&[(9, &g)]), now);
        // Same PID, different start time, seen on the very next scrape.
        let r = acc.update(&[proc(9, 200, 3)], &assign(&[(9, &g)]), now);
        assert_eq!(cpu(&r, "g"), 53);
        assert_eq!(acc.baseline("g").unwrap().cpu_user_ticks, 50);
        assert_eq!(acc.tracked_len(), 1);
    }

    #[test]
    fn test_conservation_at_fold() {
        let g: Arc<str> = Arc::from("g");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();
        let procs = vec![proc(1, 1, 7), proc(2, 2, 5)];
        let r1 = acc.update(&procs, &assign(&[(1, &g), (2, &g)]), now);
        assert_eq!(cpu(&r1, "g"), 12);

        let before = acc.baseline("g").unwrap();
        let last = acc
            .tracked(&ProcIdentity {
                pid: 2,
                start_time: 2,
            })
            .unwrap()
            .last;
        // pid 2 exits, pid 1 unchanged: exposed total is unchanged.
        let r2 = acc.update(&procs[..1], &assign(&[(1, &g)]), now);
        let after = acc.baseline("g").unwrap();
        assert_eq!(after, before + last);
        assert_eq!(cpu(&r2, "g"), 12);
    }

    #[test]
    fn test_monotonic_across_churn() {
        let g: Arc<str> = Arc::from("g");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();
        let scrapes: Vec<Vec<ProcAttributes>> = vec![
            vec![proc(1, 1, 5), proc(2, 2, 3)],
            vec![proc(1, 1, 9)],
            vec![proc(1, 1, 9), proc(2, 3, 0)],
            vec![proc(3, 4, 2)],
            vec![],
            vec![proc(1, 5, 1), proc(2, 6, 1), proc(3, 4, 4)],
        ];
        let mut prev = 0;
        for procs in &scrapes {
            let groups: HashMap<u32, Arc<str>> =
                procs.iter().map(|p| (p.pid, Arc::clone(&g))).collect();
            let r = acc.update(procs, &groups, now);
            let v = cpu(&r, "g");
            assert!(v >= prev, "counter went from {} to {}", prev, v);
            prev = v;
        }
        assert_eq!(prev, 9 + 3 + 4 + 1 + 1);
    }

    #[test]
    fn test_unmatched_process_contributes_nothing() {
        let mut acc = GroupAccumulator::new();
        let r = acc.update(&[proc(1, 1, 100)], &HashMap::new(), Utc::now());
        assert!(r.groups.is_empty());
        assert_eq!(
            acc.prior(&ProcIdentity {
                pid: 1,
                start_time: 1
            }),
            Some(Classification::Unmatched)
        );
        // Forgotten once it is gone.
        acc.update(&[], &HashMap::new(), Utc::now());
        assert_eq!(
            acc.prior(&ProcIdentity {
                pid: 1,
                start_time: 1
            }),
            None
        );
    }

    #[test]
    fn test_migration_keeps_both_groups_monotonic_and_conserves() {
        let a: Arc<str> = Arc::from("a");
        let b: Arc<str> = Arc::from("b");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();

        let r1 = acc.update(&[proc(1, 1, 10)], &assign(&[(1, &a)]), now);
        assert_eq!(cpu(&r1, "a"), 10);

        let r2 = acc.update(&[proc(1, 1, 14)], &assign(&[(1, &b)]), now);
        assert_eq!(cpu(&r2, "a"), 10);
        assert_eq!(cpu(&r2, "b"), 4);
        assert_eq!(r2.groups["a"].procs, 0);
        assert_eq!(r2.groups["b"].procs, 1);

        let r3 = acc.update(&[], &HashMap::new(), now);
        assert_eq!(cpu(&r3, "a"), 10);
        assert_eq!(cpu(&r3, "b"), 4);
    }

    #[test]
    fn test_reclassified_to_unmatched_folds_contribution() {
        let a: Arc<str> = Arc::from("a");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();
        acc.update(&[proc(1, 1, 10)], &assign(&[(1, &a)]), now);
        let r = acc.update(&[proc(1, 1, 20)], &HashMap::new(), now);
        assert_eq!(cpu(&r, "a"), 10);
        assert_eq!(r.groups["a"].procs, 0);
        assert_eq!(acc.tracked_len(), 0);
    }

    #[test]
    fn test_counter_regression_within_identity_is_ignored() {
        let g: Arc<str> = Arc::from("g");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();
        acc.update(&[proc(1, 1, 10)], &assign(&[(1, &g)]), now);
        // e.g. an io file that became unreadable and read as zero
        let r = acc.update(&[proc(1, 1, 0)], &assign(&[(1, &g)]), now);
        assert_eq!(cpu(&r, "g"), 10);
    }

    #[test]
    fn test_gauges_follow_live_set() {
        let g: Arc<str> = Arc::from("g");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();
        let mut p1 = proc(1, 50, 0);
        p1.filedesc = Filedesc {
            open: 10,
            limit: 100,
        };
        p1.memory.resident = 1000;
        p1.num_threads = 4;
        let mut p2 = proc(2, 20, 0);
        p2.filedesc = Filedesc {
            open: 90,
            limit: 100,
        };
        p2.memory.resident = 500;
        p2.num_threads = 2;

        let r = acc.update(&[p1.clone(), p2], &assign(&[(1, &g), (2, &g)]), now);
        let gc = &r.groups["g"];
        assert_eq!(gc.procs, 2);
        assert_eq!(gc.open_fds, 100);
        assert!((gc.worst_fd_ratio - 0.9).abs() < 1e-9);
        assert_eq!(gc.memory.resident, 1500);
        assert_eq!(gc.num_threads, 6);
        assert_eq!(gc.oldest_start_time, Some(20));

        let r = acc.update(&[p1], &assign(&[(1, &g)]), now);
        let gc = &r.groups["g"];
        assert_eq!(gc.procs, 1);
        assert_eq!(gc.open_fds, 10);
        assert_eq!(gc.memory.resident, 1000);
        assert_eq!(gc.oldest_start_time, Some(50));
    }

    #[test]
    fn test_threads_accumulate_per_name() {
        let g: Arc<str> = Arc::from("g");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();
        let thread = |tid: u32, name: &str, start: u64, cpu: u64| ThreadAttributes {
            tid,
            name: name.into(),
            start_time: start,
            counts: Counts {
                cpu_system_ticks: cpu,
                ..Default::default()
            },
        };
        let mut p = proc(1, 1, 0);
        p.threads = vec![thread(1, "main", 1, 5), thread(2, "worker", 2, 7), thread(3, "worker", 3, 1)];
        let r = acc.update(&[p.clone()], &assign(&[(1, &g)]), now);
        let key: ThreadKey = (Arc::clone(&g), Arc::from("worker"));
        assert_eq!(r.threads[&key].threads, 2);
        assert_eq!(r.threads[&key].counts.cpu_system_ticks, 8);

        // One worker exits, a new one starts with the recycled tid.
        p.threads = vec![thread(1, "main", 1, 6), thread(2, "worker", 2, 9), thread(3, "worker", 30, 2)];
        let r = acc.update(&[p], &assign(&[(1, &g)]), now);
        assert_eq!(r.threads[&key].threads, 2);
        assert_eq!(r.threads[&key].counts.cpu_system_ticks, 9 + 1 + 2);
    }

    #[test]
    fn test_transient_absence_is_not_counted_twice() {
        let g: Arc<str> = Arc::from("g");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();
        let id = ProcIdentity {
            pid: 7,
            start_time: 70,
        };

        acc.update(&[proc(7, 70, 10)], &assign(&[(7, &g)]), now);
        let r = acc.update(&[], &HashMap::new(), now);
        assert_eq!(cpu(&r, "g"), 10);
        assert_eq!(r.groups["g"].procs, 0);
        assert_eq!(acc.prior(&id), Some(Classification::Group(Arc::clone(&g))));

        let r = acc.update(&[proc(7, 70, 12)], &assign(&[(7, &g)]), now);
        assert_eq!(cpu(&r, "g"), 12);
        assert_eq!(r.groups["g"].procs, 1);
        assert_eq!(acc.tracked(&id).unwrap().offset.cpu_user_ticks, 10);
    }

    #[test]
    fn test_dormant_identity_expires_after_second_absence() {
        let g: Arc<str> = Arc::from("g");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();
        let id = ProcIdentity {
            pid: 7,
            start_time: 70,
        };
        acc.update(&[proc(7, 70, 10)], &assign(&[(7, &g)]), now);
        acc.update(&[], &HashMap::new(), now);
        acc.update(&[], &HashMap::new(), now);
        assert_eq!(acc.prior(&id), None);
        assert_eq!(acc.baseline("g").unwrap().cpu_user_ticks, 10);
    }

    #[test]
    fn test_unmatch_then_rematch_credits_only_matched_usage() {
        let g: Arc<str> = Arc::from("g");
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();

        acc.update(&[proc(1, 1, 10)], &assign(&[(1, &g)]), now);
        let r = acc.update(&[proc(1, 1, 11)], &HashMap::new(), now);
        assert_eq!(cpu(&r, "g"), 10);

        // The tick spent while unmatched belongs to no group.
        let r = acc.update(&[proc(1, 1, 14)], &assign(&[(1, &g)]), now);
        assert_eq!(cpu(&r, "g"), 13);
        assert_eq!(r.groups["g"].procs, 1);

        let r = acc.update(&[], &HashMap::new(), now);
        assert_eq!(cpu(&r, "g"), 13);
    }

    #[test]
    fn test_reports_are_numbered_in_order() {
        let mut acc = GroupAccumulator::new();
        let now = Utc::now();
        let r1 = acc.update(&[], &HashMap::new(), now);
        let r2 = acc.update(&[], &HashMap::new(), now);
        assert_eq!(r1.sequence, 1);
        assert_eq!(r2.sequence, 2);
    }
}
