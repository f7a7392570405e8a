//! Test utilities for spinning up a real Neo4j instance via testcontainers.

use neo4rs::query;
use testcontainers::{
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

use crate::testing::case_file;
use crate::GraphClient;

/// Spin up a Neo4j container and return the container handle + connected GraphClient.
///
/// The container is dropped (and stopped) when `ContainerAsync` goes out of scope,
/// so callers must hold it alive for the duration of the test.
pub async fn neo4j_container() -> (ContainerAsync<GenericImage>, GraphClient) {
    let image = GenericImage::new("neo4j", "5.25.1-community")
        .with_exposed_port(ContainerPort::Tcp(7687))
        .with_wait_for(WaitFor::message_on_stdout("Started."))
        .with_env_var("NEO4J_AUTH", "neo4j/testpassword");

    let container: ContainerAsync<GenericImage> = image
        .start()
        .await
        .expect("Failed to start Neo4j container");

    let host_port = container
        .get_host_port_ipv4(7687)
        .await
        .expect("Failed to get Neo4j host port");

    let uri = format!("bolt://127.0.0.1:{host_port}");
    let client = GraphClient::connect(&uri, "neo4j", "testpassword")
        .await
        .expect("Failed to connect to Neo4j");

    (container, client)
}

/// Write the case-file fixture into Neo4j: one labelled node per entity
/// (with `aka` for the first alias) and one relationship per relation.
pub async fn seed_case_file(client: &GraphClient) {
    let (entities, relations) = case_file().snapshot();
    let g = client.inner();

    for entity in &entities {
        let mut q = match entity.aliases.first() {
            Some(aka) => query(&format!(
                "CREATE (n:{} {{id: $id, aka: $aka}})",
                entity.entity_type
            ))
            .param("aka", aka.as_str()),
            None => query(&format!("CREATE (n:{} {{id: $id}})", entity.entity_type)),
        };
        q = q.param("id", entity.id.as_str());
        g.run(q).await.expect("Failed to create node");
    }

    for rel in &relations {
        let sets: Vec<String> = rel
            .attributes
            .keys()
            .enumerate()
            .map(|(i, k)| format!("SET r.`{k}` = $p{i}"))
            .collect();
        let cypher = format!(
            "MATCH (a {{id: $source}}), (b {{id: $target}})
             CREATE (a)-[r:{}]->(b)
             {}",
            rel.relation,
            sets.join("\n")
        );
        let mut q = query(&cypher)
            .param("source", rel.source.as_str())
            .param("target", rel.target.as_str());
        for (i, v) in rel.attributes.values().enumerate() {
            q = q.param(&format!("p{i}"), v.as_str());
        }
        g.run(q).await.expect("Failed to create relationship");
    }
}
