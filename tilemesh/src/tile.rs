use crate::error::Result;
use crate::model::Model;
use crate::point::{Point, PointMatch};
use std::collections::{BTreeSet, VecDeque};

/// Index of a tile inside its [`TileGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId(pub usize);

/// Index of a point inside the [`TileGraph`] point arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointId(pub usize);

/// A correspondence stored by reference into the point arena.
///
/// `p1` belongs to the tile holding the link; `p2` belongs to a neighbour (or
/// to nobody for a fixed target).
#[derive(Debug, Clone, PartialEq)]
pub struct MatchLink {
    pub p1: PointId,
    pub p2: PointId,
    weights: Vec<f64>,
    strength: f64,
}

impl MatchLink {
    pub fn weight(&self) -> f64 {
        self.weights.iter().product()
    }
}

/// A rigid piece of the configuration: one model plus the links that constrain it.
#[derive(Debug, Clone)]
pub struct Tile<M> {
    model: M,
    matches: Vec<MatchLink>,
    connected: BTreeSet<TileId>,
    cost: f64,
    distance: f64,
}

impl<M> Tile<M> {
    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn matches(&self) -> &[MatchLink] {
        &self.matches
    }

    pub fn connected_tiles(&self) -> &BTreeSet<TileId> {
        &self.connected
    }

    /// Weighted mean squared match distance after the last update.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Mean match distance after the last update.
    pub fn distance(&self) -> f64 {
        self.distance
    }
}

/// Arena owning every tile and every match point.
///
/// A point shared between two tiles (the `p1` of one tile's match is the `p2` of
/// the neighbour's flipped match) is stored once and addressed by [`PointId`],
/// so applying a tile's model is immediately visible to its neighbours.
#[derive(Debug, Clone)]
pub struct TileGraph<M> {
    tiles: Vec<Tile<M>>,
    points: Vec<Point>,
    owners: Vec<Option<TileId>>,
}

impl<M> Default for TileGraph<M> {
    fn default() -> Self {
        TileGraph { tiles: Vec::new(), points: Vec::new(), owners: Vec::new() }
    }
}

impl<M: Model> TileGraph<M> {
    pub fn new() -> Self {
        TileGraph::default()
    }

    pub fn add_tile(&mut self, model: M) -> TileId {
        self.tiles.push(Tile {
            model,
            matches: Vec::new(),
            connected: BTreeSet::new(),
            cost: 0.0,
            distance: 0.0,
        });
        TileId(self.tiles.len() - 1)
    }

    pub fn tile(&self, id: TileId) -> &Tile<M> {
        &self.tiles[id.0]
    }

    pub fn tile_mut(&mut self, id: TileId) -> &mut Tile<M> {
        &mut self.tiles[id.0]
    }

    pub fn model_mut(&mut self, id: TileId) -> &mut M {
        &mut self.tiles[id.0].model
    }

    pub fn tiles(&self) -> impl Iterator<Item = (TileId, &Tile<M>)> {
        self.tiles.iter().enumerate().map(|(i, t)| (TileId(i), t))
    }

    pub fn tile_ids(&self) -> impl Iterator<Item = TileId> {
        (0..self.tiles.len()).map(TileId)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn point(&self, id: PointId) -> &Point {
        &self.points[id.0]
    }

    /// The tile whose model moves this point, `None` for fixed targets.
    pub fn point_owner(&self, id: PointId) -> Option<TileId> {
        self.owners[id.0]
    }

    fn add_point(&mut self, point: Point, owner: Option<TileId>) -> PointId {
        self.points.push(point);
        self.owners.push(owner);
        PointId(self.points.len() - 1)
    }

    /// Adds one-sided constraints: `p1` of each match becomes a point of `tile`,
    /// `p2` a fixed target that no tile moves.
    pub fn add_matches(&mut self, tile: TileId, matches: &[PointMatch]) {
        for m in matches {
            let p1 = self.add_point(m.p1.clone(), Some(tile));
            let p2 = self.add_point(m.p2.clone(), None);
            self.tiles[tile.0].matches.push(MatchLink {
                p1,
                p2,
                weights: m.weights().to_vec(),
                strength: m.strength(),
            });
        }
    }

    /// Connects two tiles by `matches` (`p1` in `a`, `p2` in `b`).
    ///
    /// `a` receives the matches and `b` their flipped versions; both reference the
    /// same two arena points per match.
    pub fn connect(&mut self, a: TileId, b: TileId, matches: &[PointMatch]) {
        for m in matches {
            let pa = self.add_point(m.p1.clone(), Some(a));
            let pb = self.add_point(m.p2.clone(), Some(b));
            self.tiles[a.0].matches.push(MatchLink {
                p1: pa,
                p2: pb,
                weights: m.weights().to_vec(),
                strength: m.strength(),
            });
            self.tiles[b.0].matches.push(MatchLink {
                p1: pb,
                p2: pa,
                weights: m.weights().to_vec(),
                strength: m.strength(),
            });
        }
        self.tiles[a.0].connected.insert(b);
        self.tiles[b.0].connected.insert(a);
    }

    /// Removes the adjacency and every link between `a` and `b`. The points stay
    /// in the arena, unreferenced.
    pub fn disconnect(&mut self, a: TileId, b: TileId) {
        let owners = &self.owners;
        self.tiles[a.0].matches.retain(|l| owners[l.p2.0] != Some(b));
        self.tiles[b.0].matches.retain(|l| owners[l.p2.0] != Some(a));
        self.tiles[a.0].connected.remove(&b);
        self.tiles[b.0].connected.remove(&a);
    }

    /// Materializes the tile's links as owned [`PointMatch`]es.
    pub fn matches_of(&self, id: TileId) -> Vec<PointMatch> {
        self.links_to_matches(self.tiles[id.0].matches.iter())
    }

    fn links_to_matches<'a>(&self, links: impl Iterator<Item = &'a MatchLink>) -> Vec<PointMatch> {
        links
            .map(|l| {
                PointMatch::with_weights(
                    self.points[l.p1.0].clone(),
                    self.points[l.p2.0].clone(),
                    l.weights.clone(),
                    l.strength,
                )
            })
            .collect()
    }

    /// Matches of `id` whose far point is a fixed target or belongs to a tile
    /// accepted by `accept`.
    pub(crate) fn matches_into<F: Fn(TileId) -> bool>(&self, id: TileId, accept: F) -> Vec<PointMatch> {
        let owners = &self.owners;
        self.links_to_matches(
            self.tiles[id.0]
                .matches
                .iter()
                .filter(|l| owners[l.p2.0].map_or(true, &accept)),
        )
    }

    pub fn fit_tile(&mut self, id: TileId) -> Result<()> {
        let matches = self.matches_of(id);
        self.tiles[id.0].model.fit(&matches)
    }

    /// Moves the world coordinates of all points owned by `id` through its model.
    pub fn apply_tile(&mut self, id: TileId) {
        let tile = &self.tiles[id.0];
        for link in &tile.matches {
            let point = &mut self.points[link.p1.0];
            point.apply(&tile.model);
        }
    }

    /// Recomputes the tile's mean distance and weighted mean squared distance,
    /// and stores the latter as the model cost.
    pub fn update_tile(&mut self, id: TileId) {
        let tile = &self.tiles[id.0];
        let mut distance_sum = 0.0;
        let mut cost_sum = 0.0;
        let mut weight_sum = 0.0;
        for link in &tile.matches {
            let d = Point::distance(&self.points[link.p1.0], &self.points[link.p2.0]);
            let w = link.weight();
            distance_sum += d;
            cost_sum += w * d * d;
            weight_sum += w;
        }
        let n = tile.matches.len();
        let distance = if n > 0 { distance_sum / n as f64 } else { 0.0 };
        let cost = if weight_sum > 0.0 { cost_sum / weight_sum } else { 0.0 };

        let tile = &mut self.tiles[id.0];
        tile.distance = distance;
        tile.cost = cost;
        tile.model.set_cost(cost);
    }

    /// Partitions the tiles into connected components by breadth-first tracing.
    ///
    /// Components are listed in order of their smallest tile id, members in the
    /// order they were reached.
    pub fn identify_connected_graphs(&self) -> Vec<Vec<TileId>> {
        let mut seen = vec![false; self.tiles.len()];
        let mut graphs = Vec::new();
        for start in 0..self.tiles.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut graph = Vec::new();
            let mut queue = VecDeque::from([TileId(start)]);
            while let Some(id) = queue.pop_front() {
                graph.push(id);
                for &next in &self.tiles[id.0].connected {
                    if !seen[next.0] {
                        seen[next.0] = true;
                        queue.push_back(next);
                    }
                }
            }
            graphs.push(graph);
        }
        graphs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation_model::TranslationModel;
    use approx::assert_abs_diff_eq;

    fn shifted(n: usize, dx: f64) -> Vec<PointMatch> {
        (0..n)
            .map(|i| {
                let p = [i as f64 * 10.0, (i % 3) as f64 * 7.0];
                PointMatch::from_locations(p, [p[0] + dx, p[1]], 1.0)
            })
            .collect()
    }

    #[test]
    fn connect_shares_points_between_tiles() {
        let mut graph = TileGraph::new();
        let a = graph.add_tile(TranslationModel::default());
        let b = graph.add_tile(TranslationModel::default());
        graph.connect(a, b, &shifted(3, 5.0));

        assert_eq!(graph.tile(a).matches().len(), 3);
        assert_eq!(graph.tile(b).matches().len(), 3);
        assert!(graph.tile(a).connected_tiles().contains(&b));
        for (la, lb) in graph.tile(a).matches().iter().zip(graph.tile(b).matches()) {
            assert_eq!(la.p1, lb.p2);
            assert_eq!(la.p2, lb.p1);
        }

        // moving b's points is visible as a's targets
        *graph.model_mut(b) = TranslationModel::new(1.0, 0.0);
        graph.apply_tile(b);
        let m = &graph.matches_of(a)[0];
        assert_eq!(m.p2.world(), [6.0, 0.0]);
    }

    #[test]
    fn update_tile_measures_residuals() {
        let mut graph = TileGraph::new();
        let a = graph.add_tile(TranslationModel::default());
        graph.add_matches(a, &shifted(4, 3.0));
        graph.apply_tile(a);
        graph.update_tile(a);
        assert_abs_diff_eq!(graph.tile(a).distance(), 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(graph.tile(a).cost(), 9.0, epsilon = 1e-12);

        graph.fit_tile(a).unwrap();
        graph.apply_tile(a);
        graph.update_tile(a);
        assert_abs_diff_eq!(graph.tile(a).distance(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(graph.tile(a).model().cost(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn disconnect_drops_links_of_the_pair_only() {
        let mut graph = TileGraph::new();
        let a = graph.add_tile(TranslationModel::default());
        let b = graph.add_tile(TranslationModel::default());
        let c = graph.add_tile(TranslationModel::default());
        graph.connect(a, b, &shifted(2, 1.0));
        graph.connect(a, c, &shifted(3, 1.0));
        graph.disconnect(a, b);
        assert_eq!(graph.tile(a).matches().len(), 3);
        assert!(graph.tile(b).matches().is_empty());
        assert!(!graph.tile(a).connected_tiles().contains(&b));
        assert!(graph.tile(a).connected_tiles().contains(&c));
    }

    #[test]
    fn connected_components() {
        let mut graph = TileGraph::new();
        let ids: Vec<TileId> = (0..5).map(|_| graph.add_tile(TranslationModel::default())).collect();
        graph.connect(ids[0], ids[2], &shifted(1, 0.0));
        graph.connect(ids[2], ids[4], &shifted(1, 0.0));
        graph.connect(ids[1], ids[3], &shifted(1, 0.0));
        let graphs = graph.identify_connected_graphs();
        assert_eq!(graphs, vec![vec![ids[0], ids[2], ids[4]], vec![ids[1], ids[3]]]);
    }
}
