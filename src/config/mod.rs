pub mod resolver;

pub use resolver::{ResolverConfig, DEFAULT_RESOLVER_CONFIG_PATH, ENV_RESOLVER_CONFIG_PATH};
