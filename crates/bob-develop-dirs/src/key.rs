// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use bob_digest::Digest;

/// Identifies one step's develop-mode directory slot: the recipe that
/// produced it plus its variant-id. Mirrors the original's database key
/// (`recipe.getName().encode('utf8') + step.getVariantId()`) -- two steps
/// of the *same* recipe and variant-id share a directory, but the same
/// variant-id under a different recipe name does not, unlike release
/// mode's by-variant-id-only persister.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct DevelopDirKey {
    pub recipe_name: String,
    pub variant_id: Digest,
}

impl DevelopDirKey {
    pub fn new(recipe_name: impl Into<String>, variant_id: Digest) -> Self {
        Self { recipe_name: recipe_name.into(), variant_id }
    }

    pub(crate) fn blob(&self) -> Vec<u8> {
        let mut key = self.recipe_name.as_bytes().to_vec();
        key.extend_from_slice(self.variant_id.as_bytes());
        key
    }
}

impl std::fmt::Display for DevelopDirKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.recipe_name, self.variant_id.to_hex())
    }
}
