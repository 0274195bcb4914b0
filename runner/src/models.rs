use crate::{config::ConfigErrors, work::Model};
use ignore::WalkBuilder;
use itertools::Itertools;
use std::path::Path;
use tracing::{debug, warn};

/// `count` visually distinct colors as `#rrggbb`, hues evenly spread around the color wheel
pub fn distinct_colors(count: usize) -> Vec<String> {
    (0..count)
        .map(|index| {
            let hue = index as f64 / count as f64;
            // alternate the value a bit so neighbouring hues still separate for larger counts
            let value = if index % 2 == 0 { 0.9 } else { 0.7 };
            let (r, g, b) = hsv_to_rgb(hue, 0.8, value);

            format!("#{r:02x}{g:02x}{b:02x}")
        })
        .collect()
}

fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> (u8, u8, u8) {
    let sector = (hue * 6.0).floor();
    let fraction = hue * 6.0 - sector;
    let p = value * (1.0 - saturation);
    let q = value * (1.0 - fraction * saturation);
    let t = value * (1.0 - (1.0 - fraction) * saturation);

    let (r, g, b) = match sector as u32 % 6 {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    };

    let channel = |x: f64| (x * 255.0).round().clamp(0.0, 255.0) as u8;

    (channel(r), channel(g), channel(b))
}

/// every direct sub-directory of `root` is a model, optionally restricted to `only`
///
/// Models come back sorted by their upper-cased name with colors assigned in that order, so
/// every worker discovering the same tree ends up with the same list.
pub fn discover(root: &Path, only: &[String]) -> Result<Vec<Model>, ConfigErrors> {
    if !root.is_dir() {
        return Err(ConfigErrors::Discovery {
            path: root.to_path_buf(),
            reason: String::from("not a directory"),
        });
    }

    let mut models = Vec::new();

    for entry in WalkBuilder::new(root)
        .max_depth(Some(1))
        .standard_filters(false)
        .hidden(true)
        .build()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!("Failed to search for models: {error}");
                continue;
            }
        };

        if entry.depth() != 1 || !entry.file_type().map_or(false, |kind| kind.is_dir()) {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();

        if !only.is_empty() && !only.contains(&name) {
            debug!(model = %name, "Skipping model that was not selected");
            continue;
        }

        models.push((name, entry.into_path()));
    }

    for missing in only
        .iter()
        .filter(|name| !models.iter().any(|(found, _)| found == *name))
    {
        warn!(model = %missing, "Selected model was not found below {}", root.display());
    }

    let colors = distinct_colors(models.len());

    Ok(models
        .into_iter()
        .sorted_by_key(|(name, _)| name.to_uppercase())
        .zip(colors)
        .map(|((name, path), color)| Model { name, path, color })
        .collect())
}
