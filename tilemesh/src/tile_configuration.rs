use crate::error::Result;
use crate::error_statistic::ErrorStatistic;
use crate::model::Model;
use crate::tile::{TileGraph, TileId};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// Stopping rules shared by the tile, spring and elastic MLS optimizers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeParams {
    /// Convergence is only declared below this error.
    pub max_allowed_error: f64,
    /// Hard iteration limit.
    pub max_iterations: usize,
    /// Widest window of the plateau test.
    pub max_plateau_width: usize,
}

impl Default for OptimizeParams {
    fn default() -> Self {
        OptimizeParams { max_allowed_error: 10.0, max_iterations: 1000, max_plateau_width: 200 }
    }
}

/// Outcome of an iterative optimization.
#[derive(Debug, Clone, PartialEq)]
pub struct Convergence {
    pub iterations: usize,
    pub error: f64,
    pub min_error: f64,
    pub max_error: f64,
    /// `false` when the iteration limit was hit first.
    pub converged: bool,
}

/// A [`TileGraph`] plus the set of tiles whose models are held fixed.
#[derive(Debug, Clone)]
pub struct TileConfiguration<M> {
    graph: TileGraph<M>,
    fixed: BTreeSet<TileId>,
    unfitted: BTreeSet<TileId>,
    error: f64,
    min_error: f64,
    max_error: f64,
}

impl<M: Model> TileConfiguration<M> {
    pub fn new(graph: TileGraph<M>) -> Self {
        TileConfiguration {
            graph,
            fixed: BTreeSet::new(),
            unfitted: BTreeSet::new(),
            error: f64::MAX,
            min_error: f64::MAX,
            max_error: 0.0,
        }
    }

    pub fn fix_tile(&mut self, id: TileId) {
        self.fixed.insert(id);
    }

    pub fn is_fixed(&self, id: TileId) -> bool {
        self.fixed.contains(&id)
    }

    pub fn fixed_tiles(&self) -> &BTreeSet<TileId> {
        &self.fixed
    }

    pub fn graph(&self) -> &TileGraph<M> {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut TileGraph<M> {
        &mut self.graph
    }

    pub fn into_graph(self) -> TileGraph<M> {
        self.graph
    }

    /// Free tiles whose last fit failed and which kept their previous model.
    pub fn unfitted_tiles(&self) -> &BTreeSet<TileId> {
        &self.unfitted
    }

    /// Mean tile distance after the last [`TileConfiguration::update_errors`].
    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn min_error(&self) -> f64 {
        self.min_error
    }

    pub fn max_error(&self) -> f64 {
        self.max_error
    }

    /// Refreshes every tile's residuals and aggregates them.
    pub fn update_errors(&mut self) {
        let ids: Vec<TileId> = self.graph.tile_ids().collect();
        let mut sum = 0.0;
        let mut min = f64::MAX;
        let mut max = 0.0_f64;
        for &id in &ids {
            self.graph.update_tile(id);
            let d = self.graph.tile(id).distance();
            sum += d;
            min = min.min(d);
            max = max.max(d);
        }
        self.error = if ids.is_empty() { 0.0 } else { sum / ids.len() as f64 };
        self.min_error = if ids.is_empty() { 0.0 } else { min };
        self.max_error = max;
    }

    fn free_tiles(&self) -> Vec<TileId> {
        self.graph.tile_ids().filter(|id| !self.fixed.contains(id)).collect()
    }

    /// Installs the outcome of fitting tile `id`. A fit failure leaves the tile
    /// with its previous model; any other error is returned.
    fn accept_fit(&mut self, id: TileId, fitted: Result<M>) -> Result<()> {
        match fitted {
            Ok(model) => {
                *self.graph.model_mut(id) = model;
                self.unfitted.remove(&id);
            }
            Err(e) if e.is_fit_failure() => {
                if self.unfitted.insert(id) {
                    warn!("tile {} keeps its model: {}", id.0, e);
                }
            }
            Err(e) => return Err(e),
        }
        self.graph.apply_tile(id);
        Ok(())
    }

    fn apply_all(&mut self) {
        let ids: Vec<TileId> = self.graph.tile_ids().collect();
        for id in ids {
            self.graph.apply_tile(id);
        }
    }

    /// Sequential relaxation: every free tile is fitted to its current matches and
    /// applied, in tile order, until the error plateaus or `max_iterations` is hit.
    ///
    /// A tile whose fit fails ([`crate::error::ModelError::NotEnoughDataPoints`] or
    /// [`crate::error::ModelError::IllDefinedDataPoints`]) keeps its previous model for that
    /// iteration and is listed in [`TileConfiguration::unfitted_tiles`]; the
    /// other tiles carry on.
    ///
    /// # Errors
    /// Any other model error aborts the optimization.
    pub fn optimize(&mut self, params: &OptimizeParams) -> Result<Convergence> {
        self.run(params, |configuration| {
            for id in configuration.free_tiles() {
                let graph = &configuration.graph;
                let mut model = graph.tile(id).model().clone();
                let fitted = model.fit(&graph.matches_of(id)).map(|()| model);
                configuration.accept_fit(id, fitted)?;
            }
            Ok(())
        })
    }

    /// Like [`TileConfiguration::optimize`], but fits independent tiles in parallel.
    ///
    /// Free tiles are greedily coloured so that no two neighbours share a colour.
    /// Each colour group is fitted with rayon against the frozen state and then
    /// applied, so the result does not depend on the number of threads.
    pub fn optimize_concurrently(&mut self, params: &OptimizeParams) -> Result<Convergence> {
        let groups = self.independent_groups();
        debug!("{} free tiles in {} independent groups", self.free_tiles().len(), groups.len());
        self.run(params, |configuration| {
            for group in &groups {
                let graph = &configuration.graph;
                let fitted: Vec<Result<M>> = group
                    .par_iter()
                    .map(|&id| {
                        let mut model = graph.tile(id).model().clone();
                        model.fit(&graph.matches_of(id))?;
                        Ok(model)
                    })
                    .collect();
                for (&id, model) in group.iter().zip(fitted) {
                    configuration.accept_fit(id, model)?;
                }
            }
            Ok(())
        })
    }

    fn run<F>(&mut self, params: &OptimizeParams, mut pass: F) -> Result<Convergence>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        self.unfitted.clear();
        self.apply_all();
        self.update_errors();
        let mut observer = ErrorStatistic::new(params.max_plateau_width + 1);

        let mut iteration = 0;
        let mut converged = false;
        while iteration < params.max_iterations {
            pass(self)?;
            self.update_errors();
            observer.add(self.error);
            iteration += 1;

            if observer.is_converged(iteration, self.error, params.max_allowed_error, params.max_plateau_width) {
                converged = true;
                break;
            }
        }

        if converged {
            info!("tiles converged after {} iterations, error {:.4}", iteration, self.error);
        } else {
            warn!("tiles stopped at the iteration limit {}, error {:.4}", iteration, self.error);
        }
        Ok(Convergence {
            iterations: iteration,
            error: self.error,
            min_error: self.min_error,
            max_error: self.max_error,
            converged,
        })
    }

    /// Greedy graph colouring of the free tiles in id order.
    fn independent_groups(&self) -> Vec<Vec<TileId>> {
        let mut colour: Vec<Option<usize>> = vec![None; self.graph.len()];
        let mut groups: Vec<Vec<TileId>> = Vec::new();
        for id in self.free_tiles() {
            let taken: BTreeSet<usize> = self
                .graph
                .tile(id)
                .connected_tiles()
                .iter()
                .filter_map(|n| colour[n.0])
                .collect();
            let c = (0..).find(|c| !taken.contains(c)).unwrap_or(groups.len());
            colour[id.0] = Some(c);
            if c == groups.len() {
                groups.push(Vec::new());
            }
            groups[c].push(id);
        }
        groups
    }

    /// Rough initial alignment by breadth-first traversal from the fixed tiles.
    ///
    /// Each reached tile is fitted only to matches into tiles that are already
    /// aligned (or to fixed targets). Tiles without enough such matches are retried
    /// when another neighbour becomes aligned.
    ///
    /// # Returns
    /// The tiles that could not be aligned, typically those not connected to any
    /// fixed tile.
    pub fn pre_align(&mut self) -> Result<Vec<TileId>> {
        let mut aligned: BTreeSet<TileId> = self.fixed.clone();
        for &id in &self.fixed {
            self.graph.apply_tile(id);
        }

        let mut queue: VecDeque<TileId> = self.fixed.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            let neighbours: Vec<TileId> = self.graph.tile(current).connected_tiles().iter().copied().collect();
            for next in neighbours {
                if aligned.contains(&next) {
                    continue;
                }
                let matches = self.graph.matches_into(next, |owner| aligned.contains(&owner));
                let model = self.graph.model_mut(next);
                if matches.len() < model.min_num_matches() {
                    continue;
                }
                match model.fit(&matches) {
                    Ok(()) => {
                        self.graph.apply_tile(next);
                        aligned.insert(next);
                        queue.push_back(next);
                    }
                    Err(e) if e.is_fit_failure() => {
                        debug!("pre-align of tile {} deferred: {}", next.0, e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let unaligned: Vec<TileId> = self.graph.tile_ids().filter(|id| !aligned.contains(id)).collect();
        if !unaligned.is_empty() {
            debug!("{} tiles left unaligned", unaligned.len());
        }
        Ok(unaligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::PointMatch;
    use crate::rigid_model::RigidModel;
    use crate::translation_model::TranslationModel;
    use crate::model::CoordinateTransform;
    use approx::assert_abs_diff_eq;

    fn grid_matches(offset: [f64; 2]) -> Vec<PointMatch> {
        (0..9)
            .map(|i| {
                let p = [(i % 3) as f64 * 20.0, (i / 3) as f64 * 20.0];
                PointMatch::from_locations(p, [p[0] + offset[0], p[1] + offset[1]], 1.0)
            })
            .collect()
    }

    fn params() -> OptimizeParams {
        OptimizeParams { max_allowed_error: 1.0, max_iterations: 200, max_plateau_width: 10 }
    }

    #[test]
    fn two_tiles_converge_to_the_offset() {
        let mut graph = TileGraph::new();
        let fixed = graph.add_tile(TranslationModel::default());
        let moving = graph.add_tile(TranslationModel::default());
        // a point at p in `moving` corresponds to p + (5, 0) in `fixed`
        graph.connect(moving, fixed, &grid_matches([5.0, 0.0]));

        let mut configuration = TileConfiguration::new(graph);
        configuration.fix_tile(fixed);
        let convergence = configuration.optimize(&params()).unwrap();

        assert!(convergence.converged);
        assert!(convergence.iterations <= 200);
        assert_abs_diff_eq!(convergence.error, 0.0, epsilon = 1e-9);
        let t = configuration.graph().tile(moving).model().translation();
        assert_abs_diff_eq!(t[0], 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(t[1], 0.0, epsilon = 1e-9);
    }

    fn chain(n: usize) -> (TileConfiguration<RigidModel>, Vec<TileId>) {
        let mut graph = TileGraph::new();
        let ids: Vec<TileId> = (0..n).map(|_| graph.add_tile(RigidModel::default())).collect();
        for w in ids.windows(2) {
            graph.connect(w[1], w[0], &grid_matches([3.0, 1.0]));
        }
        let mut configuration = TileConfiguration::new(graph);
        configuration.fix_tile(ids[0]);
        (configuration, ids)
    }

    #[test]
    fn concurrent_optimization_matches_sequential_result() {
        let (mut sequential, ids) = chain(5);
        let (mut concurrent, _) = chain(5);
        let params = OptimizeParams { max_iterations: 2000, ..params() };
        let a = sequential.optimize(&params).unwrap();
        let b = concurrent.optimize_concurrently(&params).unwrap();
        assert!(a.converged && b.converged);
        for &id in &ids {
            let pa = sequential.graph().tile(id).model().apply([7.0, 7.0]);
            let pb = concurrent.graph().tile(id).model().apply([7.0, 7.0]);
            assert_abs_diff_eq!(pa[0], pb[0], epsilon = 0.05);
            assert_abs_diff_eq!(pa[1], pb[1], epsilon = 0.05);
        }
        // the last tile of the chain sits four offsets away from the fixed one
        let last = concurrent.graph().tile(ids[4]).model().apply([0.0, 0.0]);
        assert_abs_diff_eq!(last[0], 12.0, epsilon = 0.05);
        assert_abs_diff_eq!(last[1], 4.0, epsilon = 0.05);
    }

    #[test]
    fn independent_groups_never_contain_neighbours() {
        let (configuration, _) = chain(6);
        let groups = configuration.independent_groups();
        for group in &groups {
            for a in group {
                for b in group {
                    assert!(!configuration.graph().tile(*a).connected_tiles().contains(b));
                }
            }
        }
        let total: usize = groups.iter().map(Vec::len).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn pre_align_walks_out_from_fixed_tiles() {
        let (mut configuration, ids) = chain(4);
        let mut graph = configuration.into_graph();
        let island = graph.add_tile(RigidModel::default());
        configuration = TileConfiguration::new(graph);
        configuration.fix_tile(ids[0]);

        let unaligned = configuration.pre_align().unwrap();
        assert_eq!(unaligned, vec![island]);
        let p = configuration.graph().tile(ids[3]).model().apply([0.0, 0.0]);
        assert_abs_diff_eq!(p[0], 9.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p[1], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn unconstrained_tile_keeps_its_model_while_the_rest_converge() {
        let mut graph = TileGraph::new();
        let fixed = graph.add_tile(TranslationModel::default());
        let moving = graph.add_tile(TranslationModel::default());
        let loose = graph.add_tile(TranslationModel::new(2.0, 3.0));
        graph.connect(moving, fixed, &grid_matches([5.0, 0.0]));

        for concurrently in [false, true] {
            let mut configuration = TileConfiguration::new(graph.clone());
            configuration.fix_tile(fixed);
            let convergence = if concurrently {
                configuration.optimize_concurrently(&params()).unwrap()
            } else {
                configuration.optimize(&params()).unwrap()
            };

            assert!(convergence.converged);
            assert_eq!(configuration.unfitted_tiles().iter().copied().collect::<Vec<_>>(), vec![loose]);
            assert_eq!(configuration.graph().tile(loose).model().translation(), [2.0, 3.0]);
            let t = configuration.graph().tile(moving).model().translation();
            assert_abs_diff_eq!(t[0], 5.0, epsilon = 1e-9);
        }
    }
}
