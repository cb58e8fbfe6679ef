// Link filters reduce the links of a network to the subset worth drawing.

use crate::error::{Error, Result};
use crate::shape::{DenseNetwork, Link, NeuronId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub trait LinkFilter {
    fn filter(&self, links: Vec<Link>) -> Vec<Link>;
}

// Any function from links to links is a filter.
impl<F: Fn(Vec<Link>) -> Vec<Link>> LinkFilter for F {
    fn filter(&self, links: Vec<Link>) -> Vec<Link> {
        self(links)
    }
}

// Keeps every link.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllLinks;

impl LinkFilter for AllLinks {
    fn filter(&self, links: Vec<Link>) -> Vec<Link> {
        links
    }
}

// Keeps the links with the largest absolute visual weight, strongest first.
//
// Nothing is dropped while there are at most `max_links` links. Past that, at most
// `max_links` links are kept, and with a share cap also at most `max_share * len`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TopNLinks {
    max_links: f64,
    max_share: Option<f64>,
}

impl TopNLinks {
    pub const DEFAULT_MAX_SHARE: f64 = 0.1;

    pub fn new(max_links: usize) -> TopNLinks {
        TopNLinks {
            max_links: max_links as f64,
            max_share: Some(Self::DEFAULT_MAX_SHARE),
        }
    }

    // A top-N filter without the share cap. The budget may be fractional and is rounded down.
    pub fn uncapped(max_links: f64) -> TopNLinks {
        TopNLinks {
            max_links,
            max_share: None,
        }
    }

    pub fn with_max_share(self, max_share: f64) -> TopNLinks {
        TopNLinks {
            max_share: Some(max_share),
            ..self
        }
    }

    // Number of links kept out of `len` once the filter has to drop some.
    pub fn keep_count(&self, len: usize) -> usize {
        let bound = match self.max_share {
            Some(max_share) => self.max_links.min(max_share * len as f64),
            None => self.max_links,
        };
        bound.max(0.0).floor() as usize
    }
}

impl LinkFilter for TopNLinks {
    fn filter(&self, mut links: Vec<Link>) -> Vec<Link> {
        if links.len() as f64 <= self.max_links {
            return links;
        }
        let keep = self.keep_count(links.len());
        links.sort_by(|l1, l2| l2.visual_weight().abs().total_cmp(&l1.visual_weight().abs()));
        links.truncate(keep);
        links
    }
}

// Replaces each link's weight by its visual weight.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApplyActivation;

impl LinkFilter for ApplyActivation {
    fn filter(&self, links: Vec<Link>) -> Vec<Link> {
        if links.iter().all(|link| link.activation == 0.0) {
            return links;
        }
        links.into_iter().map(Link::with_visual_weight).collect()
    }
}

// Links whose destination is in `neurons`.
pub fn select_above(links: &[Link], neurons: &HashSet<NeuronId>) -> Vec<Link> {
    links
        .iter()
        .filter(|link| neurons.contains(&link.to))
        .copied()
        .collect()
}

// Links whose source is in `neurons`.
pub fn select_below(links: &[Link], neurons: &HashSet<NeuronId>) -> Vec<Link> {
    links
        .iter()
        .filter(|link| neurons.contains(&link.from))
        .copied()
        .collect()
}

// Keeps the links directly connected to one neuron.
#[derive(Clone, Copy, Debug)]
pub struct ImmediateNeighbors {
    pub focus: NeuronId,
}

impl ImmediateNeighbors {
    pub fn new(focus: NeuronId) -> ImmediateNeighbors {
        ImmediateNeighbors { focus }
    }
}

impl LinkFilter for ImmediateNeighbors {
    fn filter(&self, mut links: Vec<Link>) -> Vec<Link> {
        links.retain(|link| link.from == self.focus || link.to == self.focus);
        links
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

// Keeps the links that connect to one neuron through any number of hops, upwards towards
// the inputs and downwards towards the outputs.
//
// Each hop only keeps the strongest links reaching the current frontier. The budget
// `12 * hop^1.2` grows with the distance, so far hops stay readable without hiding the
// shape of the network. Links reached twice are kept twice.
#[derive(Clone, Copy, Debug)]
pub struct FarNeighbors {
    pub focus: NeuronId,
}

impl FarNeighbors {
    pub fn new(focus: NeuronId) -> FarNeighbors {
        FarNeighbors { focus }
    }

    pub fn budget(hop: u32) -> f64 {
        12.0 * f64::from(hop).powf(1.2)
    }

    fn sweep(&self, links: &[Link], direction: Direction) -> Vec<Link> {
        let mut result = Vec::new();
        let mut neurons = HashSet::from([self.focus]);
        let mut hop = 1;

        // A hop that keeps anything extends a path by one link, so acyclic links run out of
        // hops before this bound. It only matters for cyclic input.
        while !neurons.is_empty() && hop as usize <= links.len() {
            let candidates = match direction {
                Direction::Up => select_above(links, &neurons),
                Direction::Down => select_below(links, &neurons),
            };
            let neighbors = TopNLinks::uncapped(Self::budget(hop)).filter(candidates);
            neurons = neighbors
                .iter()
                .map(|link| match direction {
                    Direction::Up => link.from,
                    Direction::Down => link.to,
                })
                .collect();
            result.extend(neighbors);
            hop += 1;
        }

        result
    }
}

impl LinkFilter for FarNeighbors {
    fn filter(&self, links: Vec<Link>) -> Vec<Link> {
        let mut result = self.sweep(&links, Direction::Up);
        result.extend(self.sweep(&links, Direction::Down));
        result
    }
}

// Applies filters one after the other.
#[derive(Default)]
pub struct Chain(pub Vec<Box<dyn LinkFilter>>);

impl LinkFilter for Chain {
    fn filter(&self, links: Vec<Link>) -> Vec<Link> {
        self.0
            .iter()
            .fold(links, |links, link_filter| link_filter.filter(links))
    }
}

// Link filter as written in configuration files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkFilterConfig {
    All,
    TopN {
        max_links: usize,
        #[serde(default)]
        apply_activation: bool,
    },
    Neighbors {
        layer: usize,
        index: usize,
        #[serde(default = "far_by_default")]
        far: bool,
    },
}

fn far_by_default() -> bool {
    true
}

impl Default for LinkFilterConfig {
    fn default() -> Self {
        LinkFilterConfig::TopN {
            max_links: 200,
            apply_activation: true,
        }
    }
}

impl LinkFilterConfig {
    pub fn build(&self, network: &DenseNetwork) -> Result<Box<dyn LinkFilter>> {
        let link_filter: Box<dyn LinkFilter> = match *self {
            LinkFilterConfig::All => Box::new(AllLinks),
            LinkFilterConfig::TopN {
                max_links,
                apply_activation: false,
            } => Box::new(TopNLinks::new(max_links)),
            LinkFilterConfig::TopN {
                max_links,
                apply_activation: true,
            } => Box::new(Chain(vec![
                Box::new(ApplyActivation),
                Box::new(TopNLinks::new(max_links)),
            ])),
            LinkFilterConfig::Neighbors { layer, index, far } => {
                let focus = network
                    .layers()
                    .get(layer)
                    .and_then(|l| l.id(index))
                    .ok_or_else(|| {
                        Error::Config(format!("no neuron {index} in layer {layer}"))
                    })?;
                if far {
                    Box::new(FarNeighbors::new(focus))
                } else {
                    Box::new(ImmediateNeighbors::new(focus))
                }
            }
        };
        Ok(link_filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::LayerSpec;
    use approx::assert_relative_eq;

    fn link(from: usize, to: usize, weight: f64) -> Link {
        Link::new(NeuronId(from), NeuronId(to), weight)
    }

    fn ramp(len: usize) -> Vec<Link> {
        (0..len)
            .map(|i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                link(i, len + i, sign * i as f64)
            })
            .collect()
    }

    #[test]
    fn all_links_is_identity() {
        let links = ramp(7);
        assert_eq!(AllLinks.filter(links.clone()), links);
    }

    #[test]
    fn top_n_keeps_short_inputs() {
        let links = ramp(5);
        assert_eq!(TopNLinks::new(5).filter(links.clone()), links);
    }

    #[test]
    fn top_n_is_bounded_by_n_and_by_share() {
        let five = TopNLinks::new(5).filter(ramp(100));
        assert_eq!(five.len(), 5);

        let twenty = TopNLinks::new(20).filter(ramp(100));
        assert_eq!(twenty.len(), 10);

        for pair in twenty.windows(2) {
            assert!(pair[0].weight.abs() >= pair[1].weight.abs());
        }
        assert_relative_eq!(twenty[0].weight, -99.0);
        assert_relative_eq!(twenty[9].weight, 90.0);
    }

    #[test]
    fn top_n_ranks_by_visual_weight() {
        let mut strong_source = link(0, 2, 2.0);
        strong_source.activation = 2.0;
        let links = vec![link(1, 2, 3.5), strong_source, link(1, 3, 0.1)];

        let kept = TopNLinks::uncapped(1.0).filter(links);
        assert_eq!(kept, vec![strong_source]);
        assert_relative_eq!(kept[0].visual_weight(), 4.0);
    }

    #[test]
    fn uncapped_budget_rounds_down() {
        let kept = TopNLinks::uncapped(FarNeighbors::budget(2)).filter(ramp(40));
        assert_eq!(kept.len(), 27);
        assert_eq!(TopNLinks::new(50).with_max_share(0.5).keep_count(80), 40);
    }

    #[test]
    fn apply_activation_is_idempotent() {
        let mut active = link(0, 1, 2.0);
        active.activation = 0.5;
        let links = vec![active, link(2, 1, 1.0)];

        let once = ApplyActivation.filter(links);
        assert_relative_eq!(once[0].weight, 2.5);
        assert_relative_eq!(once[1].weight, 1.0);
        assert_eq!(ApplyActivation.filter(once.clone()), once);
    }

    #[test]
    fn selections_follow_link_direction() {
        let links = vec![link(0, 2, 1.0), link(1, 2, 1.0), link(2, 3, 1.0)];
        let frontier = HashSet::from([NeuronId(2)]);

        assert_eq!(select_above(&links, &frontier), links[..2].to_vec());
        assert_eq!(select_below(&links, &frontier), links[2..].to_vec());
    }

    #[test]
    fn immediate_neighbors_touch_the_focus() {
        let links = vec![link(0, 2, 1.0), link(1, 3, 1.0), link(2, 4, 1.0)];
        let kept = ImmediateNeighbors::new(NeuronId(2)).filter(links.clone());
        assert_eq!(kept, vec![links[0], links[2]]);
    }

    #[test]
    fn far_neighbors_walk_both_ways() {
        // 0 -> 2 -> 4 and 1 -> 2, 2 -> 5; 3 is unrelated.
        let links = vec![
            link(0, 2, 1.0),
            link(1, 2, 1.0),
            link(3, 6, 1.0),
            link(2, 4, 1.0),
            link(2, 5, 1.0),
            link(4, 7, 1.0),
        ];

        let kept = FarNeighbors::new(NeuronId(2)).filter(links.clone());

        assert_eq!(
            kept,
            vec![links[0], links[1], links[3], links[4], links[5]]
        );
    }

    #[test]
    fn isolated_focus_has_no_neighbors() {
        let links = vec![link(0, 1, 1.0), link(1, 2, 1.0)];
        assert!(FarNeighbors::new(NeuronId(9)).filter(links.clone()).is_empty());

        // An input neuron has nothing above it, only below.
        let kept = FarNeighbors::new(NeuronId(0)).filter(links.clone());
        assert_eq!(kept, links);
    }

    #[test]
    fn far_neighbors_limit_each_hop() {
        let focus = NeuronId(1000);
        let links: Vec<Link> = (0..30).map(|i| link(i, focus.0, i as f64)).collect();

        let kept = FarNeighbors::new(focus).filter(links);
        assert_eq!(kept.len(), 12);
        assert!(kept.iter().all(|link| link.from.0 >= 18));
    }

    #[test]
    fn far_neighbors_terminate_on_cycles() {
        let links = vec![link(0, 1, 1.0), link(1, 0, 1.0)];
        let kept = FarNeighbors::new(NeuronId(0)).filter(links);
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn closures_are_filters() {
        let strong_only = |links: Vec<Link>| -> Vec<Link> {
            links.into_iter().filter(|link| link.weight.abs() > 2.0).collect()
        };
        let chain = Chain(vec![Box::new(strong_only), Box::new(TopNLinks::uncapped(1.0))]);

        let links = vec![link(0, 1, 1.0), link(0, 2, -3.0), link(5, 6, 9.0)];
        assert_eq!(strong_only.filter(links.clone()), links[1..].to_vec());
        assert_eq!(chain.filter(links), vec![link(5, 6, 9.0)]);
    }

    #[test]
    fn chain_applies_in_order() {
        let chain = Chain(vec![
            Box::new(ImmediateNeighbors::new(NeuronId(0))),
            Box::new(TopNLinks::uncapped(1.0)),
        ]);
        let links = vec![link(0, 1, 1.0), link(0, 2, -3.0), link(5, 6, 9.0)];
        assert_eq!(chain.filter(links), vec![link(0, 2, -3.0)]);
    }

    #[test]
    fn filter_config_builds_filters() {
        let network = DenseNetwork::new(
            1.0,
            &[
                LayerSpec::new("a", 2, 1.0, 0.0, 1.0),
                LayerSpec::new("b", 2, 1.0, 0.0, 1.0),
            ],
        )
        .unwrap();

        let config: LinkFilterConfig =
            serde_json::from_str(r#"{"kind": "neighbors", "layer": 1, "index": 1}"#).unwrap();
        assert_eq!(
            config,
            LinkFilterConfig::Neighbors {
                layer: 1,
                index: 1,
                far: true
            }
        );
        let links = vec![link(0, 2, 1.0), link(0, 3, 1.0), link(1, 3, 1.0)];
        assert_eq!(config.build(&network).unwrap().filter(links).len(), 2);

        let missing = LinkFilterConfig::Neighbors {
            layer: 2,
            index: 0,
            far: false,
        };
        assert!(matches!(missing.build(&network), Err(Error::Config(_))));

        let top: LinkFilterConfig =
            serde_json::from_str(r#"{"kind": "top_n", "max_links": 3}"#).unwrap();
        assert_eq!(
            top,
            LinkFilterConfig::TopN {
                max_links: 3,
                apply_activation: false
            }
        );
    }
}
