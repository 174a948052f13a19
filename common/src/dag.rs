use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dag {
    pub nodes: Vec<DagNode>,
    pub edges: Vec<(String, String)>, // (from, to)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DagNode {
    pub id: String,
    pub op: String, // "read_csv", "map", "reduce_by_key", etc.
    #[serde(rename = "fn", default, skip_serializing_if = "Option::is_none")]
    pub fn_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Dag {
    /// Aristas entrantes por nodo. Todos los nodos declarados aparecen en el mapa.
    pub fn in_degrees(&self) -> HashMap<&str, usize> {
        let mut degrees: HashMap<&str, usize> = HashMap::new();
        for node in &self.nodes {
            degrees.insert(&node.id, 0);
        }
        for (_, to) in &self.edges {
            if let Some(d) = degrees.get_mut(to.as_str()) {
                *d += 1;
            }
        }
        degrees
    }

    /// Padres de `node_id` en el orden en que se declararon las aristas.
    pub fn parents_of(&self, node_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, to)| to == node_id)
            .map(|(from, _)| from.as_str())
            .collect()
    }

    /// Nodos sin hijos (out-degree 0); sus salidas son el resultado del job.
    pub fn sink_ids(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !self.edges.iter().any(|(from, _)| from == &n.id))
            .map(|n| n.id.as_str())
            .collect()
    }

    pub fn node(&self, node_id: &str) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Valida el grafo antes de aceptar un job:
    /// - toda arista referencia nodos declarados
    /// - el grafo es acíclico (procesamiento topológico tipo Kahn)
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("el DAG no tiene nodos".to_string());
        }

        for (from, to) in &self.edges {
            if self.node(from).is_none() {
                return Err(format!("arista referencia nodo inexistente: {from}"));
            }
            if self.node(to).is_none() {
                return Err(format!("arista referencia nodo inexistente: {to}"));
            }
        }

        // Kahn: si no logramos retirar todos los nodos, hay un ciclo.
        let mut in_degrees: HashMap<&str, usize> = self.in_degrees();
        let mut ready: Vec<&str> = in_degrees
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;

        while let Some(id) = ready.pop() {
            visited += 1;
            for (from, to) in &self.edges {
                if from == id {
                    let d = in_degrees.get_mut(to.as_str()).expect("arista ya validada");
                    *d -= 1;
                    if *d == 0 {
                        ready.push(to);
                    }
                }
            }
        }

        if visited != self.nodes.len() {
            return Err("el DAG contiene un ciclo".to_string());
        }
        Ok(())
    }
}
