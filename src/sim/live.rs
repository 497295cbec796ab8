use nalgebra::*;
use serde::{Serialize, Deserialize};

/// A point of the run: its unit-cube coordinates, its image under the prior
/// transform and its log-likelihood. Points never change after being created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePoint {

    pub id : usize,

    pub unit : DVector<f64>,

    pub transformed : DVector<f64>,

    pub logl : f64

}

/// A point removed from the live set, with its evidence weight and the log prior volume
/// it was assigned when removed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeadPoint {

    pub id : usize,

    pub logwt : f64,

    pub logvol : f64

}

/// Arena of every point created during a run. The live set and the dead ledger both
/// refer to arena entries by id, so replacing a live point never moves or copies the
/// point that was removed.
#[derive(Debug, Clone, Default)]
pub struct LivePointSet {

    arena : Vec<LivePoint>,

    live : Vec<usize>,

    dead : Vec<DeadPoint>

}

impl LivePointSet {

    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new point in the arena and returns its id. Ids increase monotonically
    /// with insertion order.
    pub fn insert(&mut self, unit : DVector<f64>, transformed : DVector<f64>, logl : f64) -> usize {
        let id = self.arena.len();
        self.arena.push(LivePoint { id, unit, transformed, logl });
        id
    }

    /// Inserts a point and adds it to the live set.
    pub fn push_live(&mut self, unit : DVector<f64>, transformed : DVector<f64>, logl : f64) -> usize {
        let id = self.insert(unit, transformed, logl);
        self.live.push(id);
        id
    }

    pub fn point(&self, id : usize) -> &LivePoint {
        &self.arena[id]
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Ids of the live points. Positions in this slice are slots: replace() keeps the slot.
    pub fn live_ids(&self) -> &[usize] {
        &self.live[..]
    }

    pub fn live(&self) -> impl Iterator<Item=&LivePoint> + '_ {
        self.live.iter().map(move |id| &self.arena[*id] )
    }

    pub fn dead(&self) -> &[DeadPoint] {
        &self.dead[..]
    }

    /// Unit-cube coordinates of the live points, in slot order.
    pub fn live_units(&self) -> Vec<DVector<f64>> {
        self.live().map(|p| p.unit.clone() ).collect()
    }

    /// Slot of the live point with the lowest log-likelihood (the first one on ties).
    pub fn worst(&self) -> Option<usize> {
        let mut worst : Option<(usize, f64)> = None;
        for (slot, p) in self.live().enumerate() {
            match worst {
                Some((_, logl)) if p.logl >= logl => { },
                _ => worst = Some((slot, p.logl))
            }
        }
        worst.map(|(slot, _)| slot )
    }

    pub fn max_logl(&self) -> f64 {
        self.live().map(|p| p.logl ).fold(f64::NEG_INFINITY, f64::max)
    }

    /// Moves the live point at slot to the dead ledger, and puts the point with id new_id
    /// (already in the arena) in its place.
    pub fn replace(&mut self, slot : usize, new_id : usize, logwt : f64, logvol : f64) {
        assert!(new_id < self.arena.len());
        let old = self.live[slot];
        self.dead.push(DeadPoint { id : old, logwt, logvol });
        self.live[slot] = new_id;
    }

    /// Records the live point at slot as dead while keeping it live. Used when the
    /// remaining live points are added to the ledger at the end of a run.
    pub fn record_dead(&mut self, slot : usize, logwt : f64, logvol : f64) {
        let id = self.live[slot];
        self.dead.push(DeadPoint { id, logwt, logvol });
    }

}
