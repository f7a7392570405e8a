use neo4rs::{query, ConfigBuilder, Graph};
use noir_common::NoirError;

/// Thin wrapper around neo4rs::Graph providing connection setup.
///
/// Opened once per process and cloned into every reader; the underlying
/// connection pool is shared.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given credentials.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, NoirError> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(10)
            .build()
            .map_err(connectivity)?;
        let graph = Graph::connect(config).await.map_err(connectivity)?;
        Ok(Self { graph })
    }

    /// Round-trip a trivial query to prove the store answers.
    pub async fn ping(&self) -> Result<(), NoirError> {
        let mut stream = self
            .graph
            .execute(query("RETURN 1 AS ping"))
            .await
            .map_err(connectivity)?;
        match stream.next().await.map_err(connectivity)? {
            Some(_) => Ok(()),
            None => Err(NoirError::Connectivity("ping returned no rows".into())),
        }
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

pub(crate) fn connectivity(e: neo4rs::Error) -> NoirError {
    NoirError::Connectivity(e.to_string())
}
