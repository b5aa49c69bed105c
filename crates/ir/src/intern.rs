//! The interning table for IR types.
//!
//! Every module owns one [`TypeTable`]. Interning a structurally equal
//! [`TypeKind`] twice yields the same [`TypeId`], which is what makes id
//! equality the definition of type equality in the IR.

use bimap::BiMap;
use itertools::Itertools;

use crate::types::{TypeId, TypeKind};

/// A bidirectional table of interned types.
#[derive(Clone, Debug, Default)]
pub struct TypeTable {
    // The internal bidirectional hash-map used for interning.
    table: BiMap<TypeId, TypeKind>,

    // The next ID to be assigned.
    next_id: usize,
}

impl TypeTable {
    /// Creates a new, empty, type table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `kind`, returning the id of the existing entry if an equal type
    /// has been interned before.
    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(id) = self.table.get_by_right(&kind) {
            return *id;
        }

        let id = TypeId::from(self.next_id);
        self.next_id += 1;
        self.table.insert(id, kind);
        id
    }

    /// Gets the structure of the type with the provided `id`, if it was
    /// interned in this table.
    #[must_use]
    pub fn get(&self, id: TypeId) -> Option<&TypeKind> {
        self.table.get_by_left(&id)
    }

    /// Gets the id of `kind` if it has already been interned, without
    /// interning it.
    #[must_use]
    pub fn find(&self, kind: &TypeKind) -> Option<TypeId> {
        self.table.get_by_right(kind).copied()
    }

    /// Gets the number of distinct types in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn bool(&mut self) -> TypeId {
        self.intern(TypeKind::Bool)
    }

    pub fn int(&mut self) -> TypeId {
        self.intern(TypeKind::Int)
    }

    pub fn float(&mut self) -> TypeId {
        self.intern(TypeKind::Float)
    }

    pub fn str(&mut self) -> TypeId {
        self.intern(TypeKind::Str)
    }

    pub fn none(&mut self) -> TypeId {
        self.intern(TypeKind::None)
    }

    pub fn list_of(&mut self, elem: TypeId) -> TypeId {
        self.intern(TypeKind::List(elem))
    }

    pub fn optional_of(&mut self, inner: TypeId) -> TypeId {
        self.intern(TypeKind::Optional(inner))
    }

    /// Renders the type with the provided `id` in the textual syntax of the
    /// IR, such as `!torch.list<!torch.int>`.
    ///
    /// Ids that are not part of this table render as `<<unknown type #n>>`
    /// rather than failing, as rendering is used while reporting problems.
    #[must_use]
    pub fn render(&self, id: TypeId) -> String {
        let Some(kind) = self.get(id) else {
            return format!("<<unknown type #{}>>", id.0);
        };

        match kind {
            TypeKind::Bool => "!torch.bool".to_string(),
            TypeKind::Int => "!torch.int".to_string(),
            TypeKind::Float => "!torch.float".to_string(),
            TypeKind::Str => "!torch.str".to_string(),
            TypeKind::None => "!torch.none".to_string(),
            TypeKind::Device => "!torch.Device".to_string(),
            TypeKind::Tensor { dtype, shape } => match (dtype, shape) {
                (None, None) => "!torch.vtensor".to_string(),
                _ => {
                    let shape_str = shape
                        .as_ref()
                        .map_or("*".to_string(), |dims| format!("[{}]", dims.iter().join(",")));
                    let dtype_str = dtype.map_or("unk".to_string(), |d| d.to_string());
                    format!("!torch.vtensor<{shape_str},{dtype_str}>")
                }
            },
            TypeKind::List(elem) => format!("!torch.list<{}>", self.render(*elem)),
            TypeKind::Optional(inner) => format!("!torch.optional<{}>", self.render(*inner)),
            TypeKind::Struct { name, fields } => {
                let fields_str = fields
                    .iter()
                    .map(|(n, t)| format!("{n}: {}", self.render(*t)))
                    .join(", ");
                format!("!torch.struct<\"{name}\", {{{fields_str}}}>")
            }
            TypeKind::Function { inputs, results } => {
                format!(
                    "({}) -> ({})",
                    inputs.iter().map(|t| self.render(*t)).join(", "),
                    results.iter().map(|t| self.render(*t)).join(", ")
                )
            }
        }
    }
}
