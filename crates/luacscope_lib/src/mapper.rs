//! Opcode numbering inference between a standard and a shuffled VM.
//!
//! Both trees must come from the same source, so prototypes and
//! instructions line up one to one and only the 7-bit opcode field
//! differs. Inconsistencies are collected, never raised.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::chunk::Proto;
use crate::opcodes::NUM_OPCODES;
use crate::{ErrorKind, ProtoPath};

/// A standard opcode seen paired with two different shuffled opcodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub standard: u8,
    pub previous: u8,
    pub seen: u8,
    pub path: ProtoPath,
    pub index: usize,
}

impl Conflict {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Conflict
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "opcode {} already mapped to {} but instruction {} of proto {} has {}",
            self.standard, self.previous, self.index, self.path, self.seen
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CountKind {
    Instructions,
    Protos,
}

impl fmt::Display for CountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountKind::Instructions => f.write_str("instruction"),
            CountKind::Protos => f.write_str("nested proto"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountMismatch {
    pub path: ProtoPath,
    pub what: CountKind,
    pub expected: usize,
    pub actual: usize,
}

impl CountMismatch {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::CountMismatch
    }
}

impl fmt::Display for CountMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} count differs in proto {}: standard has {}, shuffled has {}",
            self.what, self.path, self.expected, self.actual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MappingSummary {
    pub instructions_compared: usize,
    pub protos_compared: usize,
    pub mapped: usize,
    pub unmapped: usize,
    pub identity: usize,
    pub changed: usize,
    pub conflicts: usize,
    pub mismatches: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappingReport {
    /// standard opcode -> shuffled opcode, first pairing wins.
    pub mapping: BTreeMap<u8, u8>,
    pub conflicts: Vec<Conflict>,
    pub mismatches: Vec<CountMismatch>,
    pub instructions_compared: usize,
    pub protos_compared: usize,
}

impl MappingReport {
    /// Standard opcodes never observed in the compared streams.
    pub fn unseen(&self) -> Vec<u8> {
        (0..NUM_OPCODES as u8).filter(|op| !self.mapping.contains_key(op)).collect()
    }

    /// Shuffled opcodes claimed by more than one standard opcode.
    pub fn duplicate_targets(&self) -> BTreeMap<u8, Vec<u8>> {
        let mut by_target: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        for (&std_op, &shuf_op) in &self.mapping {
            by_target.entry(shuf_op).or_default().push(std_op);
        }
        by_target.retain(|_, sources| sources.len() > 1);
        by_target
    }

    /// No conflicts and no count mismatches.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.mismatches.is_empty()
    }

    /// Clean, every standard opcode mapped, and no two onto the same target.
    pub fn is_complete_bijection(&self) -> bool {
        self.is_clean() && self.unseen().is_empty() && self.duplicate_targets().is_empty()
    }

    pub fn summary(&self) -> MappingSummary {
        let identity = self.mapping.iter().filter(|(s, t)| s == t).count();
        MappingSummary {
            instructions_compared: self.instructions_compared,
            protos_compared: self.protos_compared,
            mapped: self.mapping.len(),
            unmapped: self.unseen().len(),
            identity,
            changed: self.mapping.len() - identity,
            conflicts: self.conflicts.len(),
            mismatches: self.mismatches.len(),
        }
    }

    /// Compares one prototype pair, without descending.
    fn compare_pair(&mut self, standard: &Proto, shuffled: &Proto, path: &[usize]) {
        self.protos_compared += 1;

        if standard.code.len() != shuffled.code.len() {
            self.mismatches.push(CountMismatch {
                path: ProtoPath(path.to_vec()),
                what: CountKind::Instructions,
                expected: standard.code.len(),
                actual: shuffled.code.len(),
            });
        } else {
            for (index, (s, t)) in standard.code.iter().zip(&shuffled.code).enumerate() {
                self.record(s.opcode(), t.opcode(), path, index);
            }
            self.instructions_compared += standard.code.len();
        }

        if standard.protos.len() != shuffled.protos.len() {
            self.mismatches.push(CountMismatch {
                path: ProtoPath(path.to_vec()),
                what: CountKind::Protos,
                expected: standard.protos.len(),
                actual: shuffled.protos.len(),
            });
        }
    }

    /// Pre-order lockstep walk over the common prefix of children at
    /// every level. `stack` holds each open pair and its next child index.
    fn compare_tree(&mut self, standard: &Proto, shuffled: &Proto) {
        let mut path = Vec::new();
        self.compare_pair(standard, shuffled, &path);
        let mut stack = vec![(standard, shuffled, 0usize)];
        while let Some(top) = stack.last_mut() {
            let (s, t, next) = *top;
            if next < s.protos.len().min(t.protos.len()) {
                top.2 += 1;
                let (cs, ct) = (&s.protos[next], &t.protos[next]);
                path.push(next);
                self.compare_pair(cs, ct, &path);
                stack.push((cs, ct, 0));
            } else {
                stack.pop();
                path.pop();
            }
        }
    }

    fn record(&mut self, std_op: u8, shuf_op: u8, path: &[usize], index: usize) {
        match self.mapping.get(&std_op) {
            None => {
                self.mapping.insert(std_op, shuf_op);
            }
            Some(&previous) if previous != shuf_op => {
                log::debug!("conflict for opcode {std_op}: {previous} vs {shuf_op}");
                self.conflicts.push(Conflict {
                    standard: std_op,
                    previous,
                    seen: shuf_op,
                    path: ProtoPath(path.to_vec()),
                    index,
                });
            }
            Some(_) => {}
        }
    }
}

/// Walks both trees in lockstep, parents before children, and infers the
/// opcode mapping. A count mismatch only skips the affected prototype's
/// instructions; its children and siblings are still compared.
pub fn map_opcodes(standard: &Proto, shuffled: &Proto) -> MappingReport {
    let mut report = MappingReport::default();
    report.compare_tree(standard, shuffled);
    let s = report.summary();
    log::info!(
        "compared {} instructions in {} protos: {} opcodes mapped, {} conflicts, {} count mismatches",
        s.instructions_compared,
        s.protos_compared,
        s.mapped,
        s.conflicts,
        s.mismatches
    );
    report
}
