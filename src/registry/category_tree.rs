use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{AppError, Result};
use crate::models::{Category, CategoryUpdate, ROOT_CATEGORY_ID};

use super::files::{read_json, write_json_atomic};

#[derive(Debug, Clone)]
struct Node {
    name: String,
    visible: bool,
    parent: Option<String>,
    children: Vec<String>,
}

/// Categories addressed by id; each node keeps its children in display order.
#[derive(Debug, Clone, Default)]
struct Arena {
    nodes: HashMap<String, Node>,
}

impl Arena {
    fn from_root(root: Category) -> Result<Self> {
        if root.id != ROOT_CATEGORY_ID {
            return Err(AppError::InvalidCategory(format!(
                "tree must be rooted at '{}', found '{}'",
                ROOT_CATEGORY_ID, root.id
            )));
        }
        let mut arena = Arena::default();
        arena.validate_subtree(&root)?;
        arena.insert_subtree(root, None);
        Ok(arena)
    }

    fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Checks ids against the arena and against each other, and names for emptiness.
    fn validate_subtree(&self, category: &Category) -> Result<()> {
        let mut pending = vec![category];
        let mut seen: Vec<&str> = Vec::new();
        while let Some(current) = pending.pop() {
            if current.id.trim().is_empty() {
                return Err(AppError::InvalidCategory("id must not be empty".to_string()));
            }
            if self.contains(&current.id) || seen.contains(&current.id.as_str()) {
                return Err(AppError::DuplicateCategoryId(current.id.clone()));
            }
            if current.name.trim().is_empty() {
                return Err(AppError::InvalidCategory(format!(
                    "category '{}' has an empty name",
                    current.id
                )));
            }
            seen.push(&current.id);
            pending.extend(current.children.iter());
        }
        Ok(())
    }

    fn insert_subtree(&mut self, category: Category, parent: Option<&str>) {
        let Category {
            id,
            name,
            visible,
            children,
        } = category;

        if let Some(parent_id) = parent {
            if let Some(parent_node) = self.nodes.get_mut(parent_id) {
                parent_node.children.push(id.clone());
            }
        }
        self.nodes.insert(
            id.clone(),
            Node {
                name,
                visible,
                parent: parent.map(str::to_string),
                children: Vec::new(),
            },
        );
        for child in children {
            self.insert_subtree(child, Some(&id));
        }
    }

    fn remove_subtree(&mut self, id: &str) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        if let Some(parent) = node.parent.as_deref().and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|child| child != id);
        }
        let mut pending = node.children;
        while let Some(child_id) = pending.pop() {
            if let Some(child) = self.nodes.remove(&child_id) {
                pending.extend(child.children);
            }
        }
    }

    fn snapshot(&self, id: &str) -> Option<Category> {
        let node = self.nodes.get(id)?;
        Some(Category {
            id: id.to_string(),
            name: node.name.clone(),
            visible: node.visible,
            children: node
                .children
                .iter()
                .filter_map(|child| self.snapshot(child))
                .collect(),
        })
    }
}

/// The hierarchy feeds are filed under. The root category always exists and
/// every successful mutation rewrites the whole tree record on disk.
#[derive(Debug)]
pub struct CategoryTree {
    path: PathBuf,
    arena: Mutex<Arena>,
}

impl CategoryTree {
    /// Load the tree record, creating a root-only tree on first run.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let arena = match read_json::<Category>(&path)? {
            Some(root) => {
                let arena = Arena::from_root(root)?;
                tracing::debug!("Loaded {} categories from {:?}", arena.nodes.len(), path);
                arena
            }
            None => {
                let root = Category::default_root();
                write_json_atomic(&path, &root)?;
                tracing::info!("Created default category tree at {:?}", path);
                Arena::from_root(root)?
            }
        };

        Ok(Self {
            path,
            arena: Mutex::new(arena),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> Category {
        self.lock()
            .snapshot(ROOT_CATEGORY_ID)
            .unwrap_or_else(Category::default_root)
    }

    pub fn find_by_id(&self, id: &str) -> Option<Category> {
        self.lock().snapshot(id)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attach `category` (and any children it carries) as the last child of `parent_id`.
    pub fn add_child(&self, category: Category, parent_id: &str) -> Result<()> {
        let mut arena = self.lock();
        if !arena.contains(parent_id) {
            return Err(AppError::NotExistCategory(parent_id.to_string()));
        }
        arena.validate_subtree(&category)?;

        let id = category.id.clone();
        let mut staged = arena.clone();
        staged.insert_subtree(category, Some(parent_id));
        self.commit(&mut arena, staged)?;

        tracing::info!("Added category {} under {}", id, parent_id);
        Ok(())
    }

    /// Merge `update` into the category in place; its children are untouched.
    pub fn update(&self, update: CategoryUpdate, target_id: &str) -> Result<()> {
        let mut arena = self.lock();
        if !arena.contains(target_id) {
            return Err(AppError::NotExistCategory(target_id.to_string()));
        }
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(AppError::InvalidCategory(format!(
                    "category '{}' cannot have an empty name",
                    target_id
                )));
            }
        }

        let mut staged = arena.clone();
        if let Some(node) = staged.nodes.get_mut(target_id) {
            if let Some(name) = update.name {
                node.name = name;
            }
            if let Some(visible) = update.visible {
                node.visible = visible;
            }
        }
        self.commit(&mut arena, staged)?;

        tracing::info!("Updated category {}", target_id);
        Ok(())
    }

    /// Detach `id` and its whole subtree. Returns false if no such category exists.
    pub fn delete(&self, id: &str) -> Result<bool> {
        if id == ROOT_CATEGORY_ID {
            return Err(AppError::InvalidCategory(
                "the root category cannot be deleted".to_string(),
            ));
        }

        let mut arena = self.lock();
        if !arena.contains(id) {
            return Ok(false);
        }

        let mut staged = arena.clone();
        staged.remove_subtree(id);
        let removed = arena.nodes.len() - staged.nodes.len();
        self.commit(&mut arena, staged)?;

        tracing::info!("Deleted category {} ({} nodes removed)", id, removed);
        Ok(true)
    }

    fn commit(&self, current: &mut Arena, staged: Arena) -> Result<()> {
        let root = staged
            .snapshot(ROOT_CATEGORY_ID)
            .ok_or_else(|| AppError::InvalidCategory("root category is missing".to_string()))?;
        write_json_atomic(&self.path, &root)?;
        *current = staged;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
