//! Resolves the group of every process in a snapshot, including roll-up of
//! unmatched children into the group of their nearest matched ancestor.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::sync::Arc;

use crate::namer::MatchNamer;
use crate::process::{ProcAttributes, ProcIdentity};

/// Upper bound on PPID hops; real process trees are far shallower.
const MAX_ANCESTOR_DEPTH: usize = 1024;

/// A classification remembered from an earlier scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Group(Arc<str>),
    Unmatched,
}

/// Assigns group names to processes.
pub struct TreeWalker<'a> {
    namer: &'a dyn MatchNamer,
    children: bool,
    names: HashMap<String, Arc<str>>,
}

impl<'a> TreeWalker<'a> {
    pub fn new(namer: &'a dyn MatchNamer, children: bool) -> Self {
        Self {
            namer,
            children,
            names: HashMap::new(),
        }
    }

    fn intern(&mut self, name: String) -> Arc<str> {
        if let Some(n) = self.names.get(&name) {
            return Arc::clone(n);
        }
        let arc: Arc<str> = Arc::from(name.as_str());
        self.names.insert(name, Arc::clone(&arc));
        arc
    }

    /// Returns pid -> group for every matched process in `procs`.
    ///
    /// `prior` supplies remembered classifications; processes it knows about
    /// are not passed to the namer again. Processes absent from the result are
    /// unmatched.
    pub fn resolve<F>(&mut self, procs: &[ProcAttributes], prior: F) -> HashMap<u32, Arc<str>>
    where
        F: Fn(&ProcIdentity) -> Option<Classification>,
    {
        let mut groups: HashMap<u32, Arc<str>> = HashMap::with_capacity(procs.len());
        let mut fresh_unmatched: Vec<&ProcAttributes> = Vec::new();

        for p in procs {
            match prior(&p.identity()) {
                Some(Classification::Group(g)) => {
                    groups.insert(p.pid, g);
                }
                Some(Classification::Unmatched) => {}
                None => match self.namer.match_and_name(p) {
                    Some(name) => {
                        let g = self.intern(name);
                        groups.insert(p.pid, g);
                    }
                    None => fresh_unmatched.push(p),
                },
            }
        }

        if self.children && !fresh_unmatched.is_empty() {
            let parents: HashMap<u32, u32> = procs.iter().map(|p| (p.pid, p.ppid)).collect();
            let inherited: Vec<(u32, Arc<str>)> = fresh_unmatched
                .iter()
                .filter_map(|p| {
                    nearest_matched_ancestor(p.ppid, &parents, &groups).map(|g| (p.pid, g))
                })
                .collect();
            groups.extend(inherited);
        }

        groups
    }
}

/// Walks PPID links from `start` to the first process that has a group.
///
/// A parent missing from the snapshot, a cycle, or an excessive depth all
/// end the walk without a match.
fn nearest_matched_ancestor(
    start: u32,
    parents: &HashMap<u32, u32>,
    groups: &HashMap<u32, Arc<str>>,
) -> Option<Arc<str>> {
    let mut visited: HashSet<u32> = HashSet::new();
    let mut cur = start;
    for _ in 0..MAX_ANCESTOR_DEPTH {
        if let Some(g) = groups.get(&cur) {
            return Some(Arc::clone(g));
        }
        if !visited.insert(cur) {
            return None;
        }
        cur = *parents.get(&cur)?;
    }
    None
}
