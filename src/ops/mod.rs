pub mod adjustments;
pub mod compositing;
pub mod filters;
pub mod gmm;
pub mod graph_cut;
pub mod segmentation;
