use std::path::Path;

use opml::{Outline, OPML};

use crate::error::Result;
use crate::models::ROOT_CATEGORY_ID;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedCategory {
    pub id: String,
    pub name: String,
    pub parent_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedFeed {
    pub name: String,
    pub url: String,
    pub category_id: String,
}

/// Categories (parents before children) and feeds found in an OPML document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpmlImport {
    pub categories: Vec<ImportedCategory>,
    pub feeds: Vec<ImportedFeed>,
}

pub fn parse_opml_file(path: &Path) -> Result<OpmlImport> {
    let content = std::fs::read_to_string(path)?;
    parse_opml_str(&content)
}

pub fn parse_opml_str(content: &str) -> Result<OpmlImport> {
    let document = OPML::from_str(content)?;
    let mut import = OpmlImport::default();
    collect_outlines(&document.body.outlines, ROOT_CATEGORY_ID, &mut import);
    Ok(import)
}

fn collect_outlines(outlines: &[Outline], category_id: &str, import: &mut OpmlImport) {
    for outline in outlines {
        let name = outline
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| outline.text.clone());

        if let Some(url) = outline.xml_url.as_ref().filter(|u| !u.trim().is_empty()) {
            import.feeds.push(ImportedFeed {
                name: if name.trim().is_empty() { url.clone() } else { name },
                url: url.clone(),
                category_id: category_id.to_string(),
            });
            continue;
        }

        if outline.outlines.is_empty() {
            continue;
        }

        let id = child_category_id(category_id, &name);
        if !import.categories.iter().any(|c| c.id == id) {
            import.categories.push(ImportedCategory {
                id: id.clone(),
                name: if name.trim().is_empty() { id.clone() } else { name },
                parent_id: category_id.to_string(),
            });
        }
        collect_outlines(&outline.outlines, &id, import);
    }
}

fn child_category_id(parent_id: &str, name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "group" } else { slug };

    if parent_id == ROOT_CATEGORY_ID {
        slug.to_string()
    } else {
        format!("{}-{}", parent_id, slug)
    }
}
