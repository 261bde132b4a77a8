//! Post-install caveats.

use anyhow::Result;

use crate::core::platform::Platform;
use crate::core::recipe::Recipe;
use crate::util::template::Vars;

/// Expand the recipe's caveats text if its predicate holds on `platform`.
pub fn render_caveats(recipe: &Recipe, platform: &Platform, vars: &Vars) -> Result<Option<String>> {
    let Some(ref caveats) = recipe.caveats else {
        return Ok(None);
    };
    if !caveats.when.matches(platform) {
        return Ok(None);
    }

    let text = vars.expand(caveats.text.trim_end())?;
    Ok(Some(text))
}
