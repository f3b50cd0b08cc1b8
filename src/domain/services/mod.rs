mod cluster_builder;

pub use cluster_builder::ClusterBuilder;
