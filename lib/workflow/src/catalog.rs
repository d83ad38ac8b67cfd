//! Built-in block catalog.
//!
//! Each block type has a fixed port signature and either routes to a remote
//! executor service or is passive. Passive blocks carry data the editor
//! writes directly, so dispatching one completes without a remote call.

use crate::node::{Node, NodeId};
use crate::port::Port;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};

/// A port in a block signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortSpec {
    /// The port's data kind.
    #[serde(rename = "type")]
    pub port_type: &'static str,
    /// Display title.
    pub title: &'static str,
    /// Display description.
    pub description: &'static str,
}

const fn port(port_type: &'static str, title: &'static str, description: &'static str) -> PortSpec {
    PortSpec {
        port_type,
        title,
        description,
    }
}

/// How a block is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Route {
    /// Handled by the named executor service.
    Remote { executor: &'static str },
    /// Completes in place; its data is supplied by the editor.
    Passive,
}

/// A block type.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BlockSpec {
    /// Block type key, stored as the node's service key.
    pub key: &'static str,
    /// Execution route.
    pub route: Route,
    /// Display title.
    pub title: &'static str,
    /// Display description.
    pub description: &'static str,
    /// Palette category.
    pub category: &'static str,
    /// Input signature, in order.
    pub inputs: &'static [PortSpec],
    /// Output signature, in order.
    pub outputs: &'static [PortSpec],
    #[serde(skip)]
    parameters: fn() -> JsonValue,
}

impl BlockSpec {
    /// Returns the default parameter blob for a new node.
    #[must_use]
    pub fn default_parameters(&self) -> JsonValue {
        (self.parameters)()
    }

    /// Builds an idle node of this type.
    #[must_use]
    pub fn instantiate(&self, node_id: impl Into<NodeId>) -> Node {
        let mut node = Node::new(node_id, self.key).with_parameters(self.default_parameters());
        node.title = Some(self.title.to_string());
        node.description = Some(self.description.to_string());
        node.category = Some(self.category.to_string());
        node.inputs = ports(self.inputs);
        node.outputs = ports(self.outputs);
        node
    }
}

fn ports(specs: &[PortSpec]) -> Vec<Port> {
    specs
        .iter()
        .zip(0u32..)
        .map(|(spec, order)| {
            let mut port = Port::new(order, spec.port_type);
            port.title = Some(spec.title.to_string());
            port.description = Some(spec.description.to_string());
            port
        })
        .collect()
}

fn no_parameters() -> JsonValue {
    json!({})
}

fn chat_parameters() -> JsonValue {
    json!({
        "responseFormatType": "text",
        "messages": [
            { "role": "system", "content": "" },
            { "role": "user", "content": "{{ input.0 }}" },
        ],
    })
}

const BASE_MODEL: &str = "Base Model";
const DATA_IO: &str = "Data Input/Output";

const PROMPT_IN: PortSpec = port("txt", "input", "pass input text to form a custom prompt");
const COMPLETION_OUT: PortSpec = port("txt", "output", "gpt-4-turbo response from chat completion");
const DOWNLOAD_IN: PortSpec = port("txt", "file input", "right click this block to download the file");

static BUILTIN: &[BlockSpec] = &[
    BlockSpec {
        key: "gpt_4_turbo",
        route: Route::Remote {
            executor: "gpt_4_turbo",
        },
        title: "GPT 4 Turbo",
        description: "A generic LLM block.",
        category: BASE_MODEL,
        inputs: &[PROMPT_IN],
        outputs: &[COMPLETION_OUT],
        parameters: chat_parameters,
    },
    BlockSpec {
        key: "gpt_4_turbo_2_inputs",
        route: Route::Remote {
            executor: "gpt_4_turbo",
        },
        title: "GPT 4 Turbo (2 inputs)",
        description: "A generic LLM block.",
        category: BASE_MODEL,
        inputs: &[
            port("txt", "input 1", "pass input text to form a custom prompt"),
            port("txt", "input 2", "pass input text to form a custom prompt"),
        ],
        outputs: &[COMPLETION_OUT],
        parameters: chat_parameters,
    },
    BlockSpec {
        key: "single_file_upload_txt",
        route: Route::Remote {
            executor: "single_file_upload",
        },
        title: "File Upload (TXT)",
        description: "Upload and store a text file.",
        category: DATA_IO,
        inputs: &[],
        outputs: &[port("txt", "file output", "uploaded text file will output from here")],
        parameters: no_parameters,
    },
    BlockSpec {
        key: "single_file_upload_pdf",
        route: Route::Remote {
            executor: "single_file_upload",
        },
        title: "File Upload (PDF)",
        description: "Upload and store a PDF file.",
        category: DATA_IO,
        inputs: &[],
        outputs: &[port("pdf", "file output", "uploaded pdf file will output from here")],
        parameters: no_parameters,
    },
    BlockSpec {
        key: "single_file_upload_csv",
        route: Route::Remote {
            executor: "single_file_upload",
        },
        title: "File Upload (CSV)",
        description: "Upload and store a CSV file.",
        category: DATA_IO,
        inputs: &[],
        outputs: &[port("csv", "file output", "uploaded csv file will output from here")],
        parameters: no_parameters,
    },
    BlockSpec {
        key: "single_file_download_txt",
        route: Route::Remote {
            executor: "single_file_download",
        },
        title: "File Download (Text)",
        description: "Download a text file.",
        category: DATA_IO,
        inputs: &[DOWNLOAD_IN],
        outputs: &[],
        parameters: no_parameters,
    },
    BlockSpec {
        key: "single_file_download_md",
        route: Route::Remote {
            executor: "single_file_download",
        },
        title: "File Download (Markdown)",
        description: "Download a markdown file.",
        category: DATA_IO,
        inputs: &[port("md", "file input", "right click this block to download the file")],
        outputs: &[],
        parameters: no_parameters,
    },
    BlockSpec {
        key: "pdf_to_txt",
        route: Route::Remote {
            executor: "pdf_to_txt",
        },
        title: "PDF to Text",
        description: "Extract the text of a PDF file.",
        category: "File Conversion",
        inputs: &[port("pdf", "input", "pdf file to be converted")],
        outputs: &[port("txt", "output", "extracted text file")],
        parameters: no_parameters,
    },
    BlockSpec {
        key: "txt_to_md",
        route: Route::Remote {
            executor: "txt_to_md",
        },
        title: "Text to Markdown",
        description: "Convert your file from text to markdown.",
        category: "File Conversion",
        inputs: &[port("txt", "input", "text file to be converted")],
        outputs: &[port("md", "output", "converted markdown file")],
        parameters: no_parameters,
    },
    BlockSpec {
        key: "sandbox_email",
        route: Route::Remote {
            executor: "sandbox_email",
        },
        title: "Sandbox Email",
        description: "Send text content to a given recipient email.",
        category: "Trigger",
        inputs: &[
            port("txt", "recipient", "recipient email"),
            port("txt", "content", "text content in the email"),
        ],
        outputs: &[],
        parameters: no_parameters,
    },
    BlockSpec {
        key: "inline_text_input",
        route: Route::Passive,
        title: "Text input",
        description: "Inline text input.",
        category: DATA_IO,
        inputs: &[],
        outputs: &[port("txt", "text output", "input text will output from here")],
        parameters: no_parameters,
    },
    BlockSpec {
        key: "inline_text_output",
        route: Route::Passive,
        title: "Text output",
        description: "Inline text output.",
        category: DATA_IO,
        inputs: &[port("txt", "text input", "input text will input from here")],
        outputs: &[],
        parameters: no_parameters,
    },
];

/// Registry of block types.
#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    blocks: &'static [BlockSpec],
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Catalog {
    /// Returns the built-in catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self { blocks: BUILTIN }
    }

    /// Looks up a block type.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'static BlockSpec> {
        self.blocks.iter().find(|b| b.key == key)
    }

    /// Returns every block type, in palette order.
    #[must_use]
    pub fn blocks(&self) -> &'static [BlockSpec] {
        self.blocks
    }

    /// Returns the route for a block type.
    #[must_use]
    pub fn route(&self, key: &str) -> Option<Route> {
        self.get(key).map(|b| b.route)
    }

    /// Builds a node of the given block type, if it exists.
    #[must_use]
    pub fn instantiate(&self, key: &str, node_id: impl Into<NodeId>) -> Option<Node> {
        self.get(key).map(|b| b.instantiate(node_id))
    }
}
