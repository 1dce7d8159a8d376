// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use bob_step::Step;

/// The one package-graph fact the scheduler needs that `Step`/`Dependencies`
/// don't already carry: a package step's own checkout step. `bob_step::Step`
/// models a step's *build* dependencies, but the checkout-package sibling
/// relationship is a property of the recipe/package graph, supplied here by
/// whatever collaborator constructed the steps.
pub trait PackageGraph: Send + Sync {
    /// The checkout step belonging to the same package as `step`, if the
    /// package has one. `step` may be a build or package step.
    fn checkout_step_of(&self, step: &Step) -> Option<Arc<Step>>;

    /// The package name `step` belongs to, used for `--no-deps`'s
    /// visibility filter. Defaults to `step.package_name`, which is enough
    /// for package/build steps already tagged by the recipe collaborator.
    fn package_of<'s>(&self, step: &'s Step) -> &'s str {
        &step.package_name
    }
}
