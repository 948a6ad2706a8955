//! Per-language extraction tables.
//!
//! Each supported language is described by a static [`LanguageSpec`]: which
//! tree-sitter node kinds define functions and types, where imports and call
//! sites live, and how doc comments attach. The walker in `mod.rs` is generic
//! over these tables.
//!
//! Extensions in the closed map without a compiled-in grammar (swift, kotlin,
//! sql, json, yaml, toml) carry `grammar: None` and are skipped gracefully.

use crate::types::UnitType;
use tree_sitter::Language;

/// How documentation attaches to a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStyle {
    /// First string expression statement inside the body (python).
    Docstring,
    /// Comment node(s) immediately preceding the definition.
    Preceding,
}

/// Static description of one language's extraction rules.
pub struct LanguageSpec {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub grammar: Option<fn() -> Language>,
    /// Node kinds producing function-like units.
    pub function_kinds: &'static [&'static str],
    /// Node kinds producing type-like units, with the unit type they map to.
    pub type_kinds: &'static [(&'static str, UnitType)],
    /// Container kinds inside which a function becomes a method.
    pub method_containers: &'static [&'static str],
    /// Node kinds carrying import declarations.
    pub import_kinds: &'static [&'static str],
    /// Node kinds that are call expressions.
    pub call_kinds: &'static [&'static str],
    /// Constructor-call kinds (subset of calls reported as constructor type).
    pub constructor_kinds: &'static [&'static str],
    pub doc_style: DocStyle,
    pub scope_separator: &'static str,
}

fn lang_python() -> Language {
    tree_sitter_python::LANGUAGE.into()
}
fn lang_javascript() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}
fn lang_typescript() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}
fn lang_tsx() -> Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}
fn lang_java() -> Language {
    tree_sitter_java::LANGUAGE.into()
}
fn lang_go() -> Language {
    tree_sitter_go::LANGUAGE.into()
}
fn lang_rust() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}
fn lang_ruby() -> Language {
    tree_sitter_ruby::LANGUAGE.into()
}
fn lang_php() -> Language {
    tree_sitter_php::LANGUAGE_PHP.into()
}
fn lang_c() -> Language {
    tree_sitter_c::LANGUAGE.into()
}
fn lang_cpp() -> Language {
    tree_sitter_cpp::LANGUAGE.into()
}
fn lang_c_sharp() -> Language {
    tree_sitter_c_sharp::LANGUAGE.into()
}

pub static PYTHON: LanguageSpec = LanguageSpec {
    name: "python",
    extensions: &["py"],
    grammar: Some(lang_python),
    function_kinds: &["function_definition"],
    type_kinds: &[("class_definition", UnitType::Class)],
    method_containers: &["class_definition"],
    import_kinds: &["import_statement", "import_from_statement"],
    call_kinds: &["call"],
    constructor_kinds: &[],
    doc_style: DocStyle::Docstring,
    scope_separator: ".",
};

pub static JAVASCRIPT: LanguageSpec = LanguageSpec {
    name: "javascript",
    extensions: &["js", "jsx"],
    grammar: Some(lang_javascript),
    function_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
        "arrow_function",
    ],
    type_kinds: &[("class_declaration", UnitType::Class)],
    method_containers: &["class_declaration", "class_body"],
    import_kinds: &["import_statement"],
    call_kinds: &["call_expression"],
    constructor_kinds: &["new_expression"],
    doc_style: DocStyle::Preceding,
    scope_separator: ".",
};

pub static TYPESCRIPT: LanguageSpec = LanguageSpec {
    name: "typescript",
    extensions: &["ts"],
    grammar: Some(lang_typescript),
    function_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
        "arrow_function",
    ],
    type_kinds: &[
        ("class_declaration", UnitType::Class),
        ("interface_declaration", UnitType::Interface),
    ],
    method_containers: &["class_declaration", "class_body"],
    import_kinds: &["import_statement"],
    call_kinds: &["call_expression"],
    constructor_kinds: &["new_expression"],
    doc_style: DocStyle::Preceding,
    scope_separator: ".",
};

pub static TSX: LanguageSpec = LanguageSpec {
    name: "tsx",
    extensions: &["tsx"],
    grammar: Some(lang_tsx),
    function_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
        "arrow_function",
    ],
    type_kinds: &[
        ("class_declaration", UnitType::Class),
        ("interface_declaration", UnitType::Interface),
    ],
    method_containers: &["class_declaration", "class_body"],
    import_kinds: &["import_statement"],
    call_kinds: &["call_expression"],
    constructor_kinds: &["new_expression"],
    doc_style: DocStyle::Preceding,
    scope_separator: ".",
};

pub static JAVA: LanguageSpec = LanguageSpec {
    name: "java",
    extensions: &["java"],
    grammar: Some(lang_java),
    function_kinds: &["method_declaration", "constructor_declaration"],
    type_kinds: &[
        ("class_declaration", UnitType::Class),
        ("interface_declaration", UnitType::Interface),
    ],
    method_containers: &["class_declaration", "interface_declaration", "class_body"],
    import_kinds: &["import_declaration"],
    call_kinds: &["method_invocation"],
    constructor_kinds: &["object_creation_expression"],
    doc_style: DocStyle::Preceding,
    scope_separator: ".",
};

pub static GO: LanguageSpec = LanguageSpec {
    name: "go",
    extensions: &["go"],
    grammar: Some(lang_go),
    function_kinds: &["function_declaration", "method_declaration"],
    type_kinds: &[("type_declaration", UnitType::Struct)],
    method_containers: &[],
    import_kinds: &["import_declaration"],
    call_kinds: &["call_expression"],
    constructor_kinds: &[],
    doc_style: DocStyle::Preceding,
    scope_separator: ".",
};

pub static RUST: LanguageSpec = LanguageSpec {
    name: "rust",
    extensions: &["rs"],
    grammar: Some(lang_rust),
    function_kinds: &["function_item"],
    type_kinds: &[
        ("struct_item", UnitType::Struct),
        ("trait_item", UnitType::Trait),
        ("enum_item", UnitType::Struct),
        ("mod_item", UnitType::Module),
    ],
    method_containers: &["impl_item", "trait_item"],
    import_kinds: &["use_declaration"],
    call_kinds: &["call_expression"],
    constructor_kinds: &[],
    doc_style: DocStyle::Preceding,
    scope_separator: "::",
};

pub static RUBY: LanguageSpec = LanguageSpec {
    name: "ruby",
    extensions: &["rb"],
    grammar: Some(lang_ruby),
    function_kinds: &["method", "singleton_method"],
    type_kinds: &[
        ("class", UnitType::Class),
        ("module", UnitType::Module),
    ],
    method_containers: &["class", "module"],
    import_kinds: &[],
    call_kinds: &["call"],
    constructor_kinds: &[],
    doc_style: DocStyle::Preceding,
    scope_separator: "::",
};

pub static PHP: LanguageSpec = LanguageSpec {
    name: "php",
    extensions: &["php"],
    grammar: Some(lang_php),
    function_kinds: &["function_definition", "method_declaration"],
    type_kinds: &[
        ("class_declaration", UnitType::Class),
        ("interface_declaration", UnitType::Interface),
    ],
    method_containers: &["class_declaration", "declaration_list"],
    import_kinds: &["namespace_use_declaration"],
    call_kinds: &["function_call_expression", "member_call_expression"],
    constructor_kinds: &["object_creation_expression"],
    doc_style: DocStyle::Preceding,
    scope_separator: "\\",
};

pub static C: LanguageSpec = LanguageSpec {
    name: "c",
    extensions: &["c", "h"],
    grammar: Some(lang_c),
    function_kinds: &["function_definition"],
    type_kinds: &[("struct_specifier", UnitType::Struct)],
    method_containers: &[],
    import_kinds: &["preproc_include"],
    call_kinds: &["call_expression"],
    constructor_kinds: &[],
    doc_style: DocStyle::Preceding,
    scope_separator: "::",
};

pub static CPP: LanguageSpec = LanguageSpec {
    name: "cpp",
    extensions: &["cpp", "hpp"],
    grammar: Some(lang_cpp),
    function_kinds: &["function_definition"],
    type_kinds: &[
        ("struct_specifier", UnitType::Struct),
        ("class_specifier", UnitType::Class),
    ],
    method_containers: &["class_specifier", "struct_specifier", "field_declaration_list"],
    import_kinds: &["preproc_include"],
    call_kinds: &["call_expression"],
    constructor_kinds: &["new_expression"],
    doc_style: DocStyle::Preceding,
    scope_separator: "::",
};

pub static C_SHARP: LanguageSpec = LanguageSpec {
    name: "c_sharp",
    extensions: &["cs"],
    grammar: Some(lang_c_sharp),
    function_kinds: &["method_declaration", "constructor_declaration", "local_function_statement"],
    type_kinds: &[
        ("class_declaration", UnitType::Class),
        ("interface_declaration", UnitType::Interface),
        ("struct_declaration", UnitType::Struct),
    ],
    method_containers: &["class_declaration", "interface_declaration", "declaration_list"],
    import_kinds: &["using_directive"],
    call_kinds: &["invocation_expression"],
    constructor_kinds: &["object_creation_expression"],
    doc_style: DocStyle::Preceding,
    scope_separator: ".",
};

// Recognized extensions without an installed grammar. Files are skipped
// gracefully instead of failing the pipeline.
pub static SWIFT: LanguageSpec = grammarless("swift", &["swift"]);
pub static KOTLIN: LanguageSpec = grammarless("kotlin", &["kt"]);
pub static SQL: LanguageSpec = grammarless("sql", &["sql"]);
pub static JSON: LanguageSpec = grammarless("json", &["json"]);
pub static YAML: LanguageSpec = grammarless("yaml", &["yaml", "yml"]);
pub static TOML: LanguageSpec = grammarless("toml", &["toml"]);

const fn grammarless(name: &'static str, extensions: &'static [&'static str]) -> LanguageSpec {
    LanguageSpec {
        name,
        extensions,
        grammar: None,
        function_kinds: &[],
        type_kinds: &[],
        method_containers: &[],
        import_kinds: &[],
        call_kinds: &[],
        constructor_kinds: &[],
        doc_style: DocStyle::Preceding,
        scope_separator: ".",
    }
}

/// All specs in the closed extension map.
pub static ALL: &[&LanguageSpec] = &[
    &PYTHON,
    &JAVASCRIPT,
    &TYPESCRIPT,
    &TSX,
    &JAVA,
    &GO,
    &RUST,
    &RUBY,
    &PHP,
    &SWIFT,
    &KOTLIN,
    &C,
    &CPP,
    &C_SHARP,
    &SQL,
    &JSON,
    &YAML,
    &TOML,
];
