//! Pipeline registry.

use hashbrown::HashMap;
use lumen_core::{Error, Result};
use lumen_gpu::GraphicsPipeline;

/// Index of a registered pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineId(pub u32);

/// Named pipelines, shared by every object that uses them.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: Vec<GraphicsPipeline>,
    names: HashMap<String, PipelineId>,
}

impl PipelineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a pipeline is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Register a built pipeline. Names must be unique.
    pub fn register(&mut self, name: &str, pipeline: GraphicsPipeline) -> Result<PipelineId> {
        if self.contains(name) {
            return Err(Error::AlreadyExists(format!("pipeline '{name}'")));
        }

        let id = PipelineId(self.pipelines.len() as u32);
        self.pipelines.push(pipeline);
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Id of a registered pipeline.
    pub fn id_of(&self, name: &str) -> Result<PipelineId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("pipeline '{name}'")))
    }

    /// A registered pipeline.
    pub fn get(&self, id: PipelineId) -> Result<&GraphicsPipeline> {
        self.pipelines
            .get(id.0 as usize)
            .ok_or_else(|| Error::NotFound(format!("pipeline #{}", id.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::{self, Handle};

    fn pipeline(raw: u64) -> GraphicsPipeline {
        GraphicsPipeline {
            pipeline: vk::Pipeline::from_raw(raw),
            layout: vk::PipelineLayout::from_raw(raw + 1),
        }
    }

    #[test]
    fn pipelines_are_shared_by_name() {
        let mut registry = PipelineRegistry::new();
        let lit = registry.register("lit", pipeline(10)).unwrap();

        assert_eq!(registry.id_of("lit").unwrap(), lit);
        assert_eq!(
            registry.get(lit).unwrap().pipeline,
            vk::Pipeline::from_raw(10)
        );
    }

    #[test]
    fn duplicates_and_unknown_names_fail() {
        let mut registry = PipelineRegistry::new();
        registry.register("lit", pipeline(10)).unwrap();

        assert!(matches!(
            registry.register("lit", pipeline(20)),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(registry.id_of("unlit"), Err(Error::NotFound(_))));
    }
}
