// Filesystem tools, confined to the sandbox roots

use super::{blocking, RegistryError, ToolRegistryBuilder};
use serde::Deserialize;
use toolsuite_core::{FieldSchema, InputSchema, SandboxedFs, ToolCategory, ToolDefinition};

#[derive(Deserialize)]
struct FileArgs {
    file_path: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    file_path: String,
    content: String,
}

#[derive(Deserialize)]
struct DirArgs {
    dir_path: String,
}

#[derive(Deserialize)]
struct DeleteDirArgs {
    dir_path: String,
    recursive: bool,
}

#[derive(Deserialize)]
struct SearchArgs {
    dir_path: String,
    pattern: String,
    recursive: bool,
}

#[derive(Deserialize)]
struct TransferArgs {
    src_path: String,
    dst_path: String,
}

fn tool(name: &str, description: &str, schema: InputSchema) -> ToolDefinition {
    ToolDefinition::new(name, description, ToolCategory::Filesystem, schema)
}

fn file_path(description: &str) -> FieldSchema {
    FieldSchema::path("file_path", description).required()
}

fn dir_path(description: &str) -> FieldSchema {
    FieldSchema::path("dir_path", description).required()
}

fn transfer_schema() -> InputSchema {
    InputSchema::new()
        .field(FieldSchema::path("src_path", "Source file path").required())
        .field(FieldSchema::path("dst_path", "Destination file path").required())
}

pub fn register(builder: ToolRegistryBuilder, fs: &SandboxedFs) -> Result<ToolRegistryBuilder, RegistryError> {
    builder
        .register(
            tool(
                "fs_read_file",
                "Reads the content of a local file.",
                InputSchema::new().field(file_path("Path to the file to read")),
            ),
            blocking(fs, |fs, a: FileArgs| fs.read_file(&a.file_path)),
        )?
        .register(
            tool(
                "fs_write_file",
                "Writes content to a local file.",
                InputSchema::new()
                    .field(file_path("Path to write the file"))
                    .field(FieldSchema::string("content", "Content to write").required()),
            ),
            blocking(fs, |fs, a: WriteArgs| fs.write_file(&a.file_path, &a.content)),
        )?
        .register(
            tool(
                "fs_list_directory",
                "Lists files and directories in a local path.",
                InputSchema::new().field(dir_path("Path to the directory to list")),
            ),
            blocking(fs, |fs, a: DirArgs| fs.list_directory(&a.dir_path)),
        )?
        .register(
            tool(
                "fs_create_directory",
                "Creates a new directory and any necessary parent directories.",
                InputSchema::new().field(dir_path("Path of the directory to create")),
            ),
            blocking(fs, |fs, a: DirArgs| fs.create_directory(&a.dir_path)),
        )?
        .register(
            tool(
                "fs_delete_directory",
                "Deletes a directory, optionally recursively.",
                InputSchema::new()
                    .field(dir_path("Path of the directory to delete"))
                    .field(
                        FieldSchema::boolean("recursive", "Whether to delete directory contents recursively")
                            .default_value(false),
                    ),
            ),
            blocking(fs, |fs, a: DeleteDirArgs| fs.delete_directory(&a.dir_path, a.recursive)),
        )?
        .register(
            tool(
                "fs_search_files",
                "Searches for files matching a pattern in a directory.",
                InputSchema::new()
                    .field(dir_path("Directory to search in"))
                    .field(FieldSchema::string("pattern", "File pattern to match (e.g., '*.txt')").default_value("*"))
                    .field(
                        FieldSchema::boolean("recursive", "Whether to search recursively in subdirectories")
                            .default_value(false),
                    ),
            ),
            blocking(fs, |fs, a: SearchArgs| fs.search_files(&a.dir_path, &a.pattern, a.recursive)),
        )?
        .register(
            tool(
                "fs_get_metadata",
                "Gets detailed metadata about a file.",
                InputSchema::new().field(file_path("Path to the file to get metadata for")),
            ),
            blocking(fs, |fs, a: FileArgs| fs.get_metadata(&a.file_path)),
        )?
        .register(
            tool(
                "fs_delete_file",
                "Deletes a file.",
                InputSchema::new().field(file_path("Path to the file to delete")),
            ),
            blocking(fs, |fs, a: FileArgs| fs.delete_file(&a.file_path)),
        )?
        .register(
            tool("fs_copy_file", "Copies a file from source to destination.", transfer_schema()),
            blocking(fs, |fs, a: TransferArgs| fs.copy_file(&a.src_path, &a.dst_path)),
        )?
        .register(
            tool("fs_move_file", "Moves a file from source to destination.", transfer_schema()),
            blocking(fs, |fs, a: TransferArgs| fs.move_file(&a.src_path, &a.dst_path)),
        )
}
