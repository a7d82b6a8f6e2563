//! Material registry.

use crate::texture::TextureId;
use crate::uniforms::MaterialUniforms;
use hashbrown::HashMap;
use lumen_core::{Error, Result};

/// Index of a registered material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialId(pub u32);

/// Surface parameters shared by every object that uses the material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Material {
    pub name: String,
    pub albedo_texture: Option<TextureId>,
}

impl Material {
    /// Fragment-stage uniform data for this material.
    pub fn uniforms(&self) -> MaterialUniforms {
        MaterialUniforms::new(self.albedo_texture)
    }
}

/// Named materials.
#[derive(Debug, Default)]
pub struct MaterialRegistry {
    materials: Vec<Material>,
    names: HashMap<String, MaterialId>,
}

impl MaterialRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a material. Names must be unique.
    pub fn register(&mut self, name: &str, albedo_texture: Option<TextureId>) -> Result<MaterialId> {
        if self.names.contains_key(name) {
            return Err(Error::AlreadyExists(format!("material '{name}'")));
        }

        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(Material {
            name: name.to_string(),
            albedo_texture,
        });
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Id of a registered material.
    pub fn id_of(&self, name: &str) -> Result<MaterialId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("material '{name}'")))
    }

    /// A registered material.
    pub fn get(&self, id: MaterialId) -> Result<&Material> {
        self.materials
            .get(id.0 as usize)
            .ok_or_else(|| Error::NotFound(format!("material #{}", id.0)))
    }

    /// Number of registered materials.
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Whether no materials are registered.
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_look_up() {
        let mut registry = MaterialRegistry::new();
        let plain = registry.register("plain", None).unwrap();
        let brick = registry.register("brick", Some(TextureId(2))).unwrap();

        assert_ne!(plain, brick);
        assert_eq!(registry.id_of("brick").unwrap(), brick);
        assert_eq!(registry.get(brick).unwrap().albedo_texture, Some(TextureId(2)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_and_missing_names_fail() {
        let mut registry = MaterialRegistry::new();
        registry.register("plain", None).unwrap();

        assert!(matches!(
            registry.register("plain", None),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(registry.id_of("gold"), Err(Error::NotFound(_))));
        assert!(registry.get(MaterialId(7)).is_err());
    }

    #[test]
    fn uniforms_encode_missing_texture_as_negative() {
        let mut registry = MaterialRegistry::new();
        let plain = registry.register("plain", None).unwrap();
        let brick = registry.register("brick", Some(TextureId(3))).unwrap();

        assert_eq!(registry.get(plain).unwrap().uniforms().albedo_texture, -1);
        assert_eq!(registry.get(brick).unwrap().uniforms().albedo_texture, 3);
    }
}
