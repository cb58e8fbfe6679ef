// Layout of dense neural networks for drawing, and the filters that pick which links between
// their neurons are worth showing.
//
// `DenseNetwork` places every neuron of every layer on a plane. Given the weights of a
// trained model and the activations of one pass, `DenseNetwork::derive_links` produces a
// `LinkedNetwork` snapshot holding the links a `LinkFilter` keeps.

pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod filter;
pub mod heat_index;
pub mod logging;
pub mod network;
pub mod playground;
pub mod presets;
pub mod shape;
pub mod testing;

pub use config::AppConfig;
pub use context::AppContext;
pub use error::{Error, Result};
pub use filter::{
    AllLinks, ApplyActivation, Chain, FarNeighbors, ImmediateNeighbors, LinkFilter,
    LinkFilterConfig, TopNLinks,
};
pub use playground::Playground;
pub use presets::NetworkKind;
pub use shape::{
    DenseNetwork, FilterScope, Layer, LayerSpec, Link, LinkedNetwork, Neuron, NeuronId,
};
