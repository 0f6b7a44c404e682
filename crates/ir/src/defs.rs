use std::fmt::{Debug, Display};

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Name(pub String);

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum NumType {
    I32,
    I64,
    F32,
    F64,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum VecType {
    V128,
}

/// The referent of a reference type.
///
/// `Func` and `Extern` are the abstract heap types of the reference-types
/// extension. `Sig` is a typed function reference naming a signature, and
/// `Abstract` names an imported abstract type.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum HeapType {
    Func,
    Extern,
    Sig(u32),
    Abstract(u32),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct RefType {
    pub nullable: bool,
    pub heap: HeapType,
}

impl RefType {
    pub const FUNCREF: RefType = RefType {
        nullable: true,
        heap: HeapType::Func,
    };

    pub const EXTERNREF: RefType = RefType {
        nullable: true,
        heap: HeapType::Extern,
    };

    pub fn typed_func(sig: u32, nullable: bool) -> Self {
        Self {
            nullable,
            heap: HeapType::Sig(sig),
        }
    }

    /// Function-like references are the only references a table may hold
    /// besides `externref`.
    pub fn is_function_like(&self) -> bool {
        matches!(self.heap, HeapType::Func | HeapType::Sig(_))
    }

    /// A reference is assignable to another when it does not gain
    /// nullability and its heap type is the same or more specific.
    pub fn is_assignable_to(&self, other: &RefType) -> bool {
        if self.nullable && !other.nullable {
            return false;
        }

        match (self.heap, other.heap) {
            (lhs, rhs) if lhs == rhs => true,
            (HeapType::Sig(_), HeapType::Func) => true,
            (HeapType::Abstract(_), HeapType::Extern) => true,
            _ => false,
        }
    }
}

impl Display for RefType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.nullable, self.heap) {
            (true, HeapType::Func) => f.write_str("funcref"),
            (true, HeapType::Extern) => f.write_str("externref"),
            (nullable, heap) => {
                f.write_str(if nullable { "(ref null " } else { "(ref " })?;
                match heap {
                    HeapType::Func => f.write_str("func")?,
                    HeapType::Extern => f.write_str("extern")?,
                    HeapType::Sig(idx) => write!(f, "{idx}")?,
                    HeapType::Abstract(idx) => write!(f, "abstract {idx}")?,
                }
                f.write_str(")")
            }
        }
    }
}

#[allow(clippy::enum_variant_names)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ValType {
    NumType(NumType),
    VecType(VecType),
    RefType(RefType),
}

impl ValType {
    pub const I32: ValType = ValType::NumType(NumType::I32);
    pub const I64: ValType = ValType::NumType(NumType::I64);
    pub const F32: ValType = ValType::NumType(NumType::F32);
    pub const F64: ValType = ValType::NumType(NumType::F64);
    pub const V128: ValType = ValType::VecType(VecType::V128);
    pub const FUNCREF: ValType = ValType::RefType(RefType::FUNCREF);
    pub const EXTERNREF: ValType = ValType::RefType(RefType::EXTERNREF);

    pub fn is_assignable_to(&self, other: &ValType) -> bool {
        match (self, other) {
            (ValType::RefType(lhs), ValType::RefType(rhs)) => lhs.is_assignable_to(rhs),
            (lhs, rhs) => lhs == rhs,
        }
    }
}

impl Display for ValType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValType::NumType(NumType::I32) => f.write_str("i32"),
            ValType::NumType(NumType::F32) => f.write_str("f32"),
            ValType::NumType(NumType::I64) => f.write_str("i64"),
            ValType::NumType(NumType::F64) => f.write_str("f64"),
            ValType::VecType(VecType::V128) => f.write_str("v128"),
            ValType::RefType(rt) => Display::fmt(rt, f),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Signature {
    pub params: Box<[ValType]>,
    pub results: Box<[ValType]>,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (idx, param) in self.params.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str("] -> [")?;
        for (idx, result) in self.results.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{result}")?;
        }
        f.write_str("]")
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ResizableLimits {
    pub min: u32,
    pub max: Option<u32>,
    pub shared: bool,
}

impl ResizableLimits {
    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self {
            min,
            max,
            shared: false,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct MemType(pub ResizableLimits);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TableType(pub RefType, pub ResizableLimits);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Mutability {
    Const,
    Variable,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct GlobalType(pub ValType, pub Mutability);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BlockType {
    Empty,
    Val(ValType),
    Sig(u32),
}

/// # MemArg
///
/// A memarg comprises an alignment exponent, an offset and (with the
/// multi-memory extension) the memory it addresses.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct MemArg {
    pub align: u32,
    pub offset: u64,
    pub memory: u32,
}

/// A single-instruction constant expression. The encoding always follows the
/// instruction with an `end` opcode.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum InitExpr {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    GlobalGet(u32),
    RefNull(HeapType),
    RefFunc(u32),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SegmentMode {
    Active { index: u32, offset: InitExpr },
    Passive,
    Declarative,
}

/// A reference into one of the module's index spaces.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Decl {
    Signature(u32),
    Function(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
    ElementSegment(u32),
    DataSegment(u32),
    AbstractType(u32),
    ImportedCommand(u32),
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FunctionBody {
    /// Absolute stream offset of the first byte of the body (the first
    /// local-declaration byte).
    pub offset: usize,
    pub bytes: Box<[u8]>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Function {
    pub sig: u32,
    pub imported: bool,
    pub body: Option<FunctionBody>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Table {
    pub ty: TableType,
    pub imported: bool,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Memory {
    pub ty: MemType,
    pub imported: bool,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Global {
    pub ty: GlobalType,
    /// `None` for imported globals.
    pub init: Option<InitExpr>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AbstractType {
    pub nullable: bool,
    pub constraints: Box<[ValType]>,
}

/// A host command imported by signature. Commands are callable by the host
/// embedding only and do not occupy the function index space.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ImportedCommand {
    pub sig: u32,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ElemItems {
    Functions(Box<[u32]>),
    Exprs(Box<[InitExpr]>),
}

impl ElemItems {
    pub fn len(&self) -> usize {
        match self {
            ElemItems::Functions(xs) => xs.len(),
            ElemItems::Exprs(xs) => xs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ElementSegment {
    pub elem_type: RefType,
    pub mode: SegmentMode,
    pub items: ElemItems,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DataSegment {
    pub mode: SegmentMode,
    pub bytes: Box<[u8]>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Import {
    pub module: Name,
    pub field: Name,
    pub decl: Decl,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Export {
    pub name: Name,
    pub decl: Decl,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CustomSection {
    pub name: Name,
    /// Absolute stream offset of the payload (after the name).
    pub offset: usize,
    pub payload: Box<[u8]>,
}

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Module {
    pub signatures: Vec<Signature>,
    pub functions: Vec<Function>,
    pub tables: Vec<Table>,
    pub memories: Vec<Memory>,
    pub globals: Vec<Global>,
    pub abstract_types: Vec<AbstractType>,
    pub commands: Vec<ImportedCommand>,
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
    pub customs: Vec<CustomSection>,
    pub start: Option<u32>,
    pub data_count: Option<u32>,
}

impl Module {
    pub fn export(&self, name: &str) -> Option<Decl> {
        self.exports
            .iter()
            .find(|export| export.name.0 == name)
            .map(|export| export.decl)
    }

    pub fn num_imported_functions(&self) -> usize {
        self.functions.iter().filter(|func| func.imported).count()
    }

    pub fn signature_of(&self, func_idx: u32) -> Option<&Signature> {
        let func = self.functions.get(func_idx as usize)?;
        self.signatures.get(func.sig as usize)
    }
}
