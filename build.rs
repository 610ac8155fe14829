// generate C header when capi feature is enabled

fn main() {
    #[cfg(feature = "capi")]
    {
        generate_c_header();
    }
}

#[cfg(feature = "capi")]
fn generate_c_header() {
    use std::env;
    use std::path::PathBuf;

    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let output_file = PathBuf::from(&crate_dir).join("agrim.h");

    println!("cargo:rerun-if-changed=src/ffi.rs");
    println!("cargo:rerun-if-changed=src/core.rs");
    println!("cargo:rerun-if-changed=src/buffered.rs");

    cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("AGRIM_H")
        .with_pragma_once(true)
        .with_documentation(true)
        .with_namespace("agrim")
        .with_parse_deps(true)
        .with_parse_include(&["libc"])
        .rename_item("AgrimErrorCode", "agrim_error_code_t")
        .rename_item("AgrimFile", "agrim_file_t")
        .with_header(
            "/**\n\
             * Agrim C API\n\
             * \n\
             * Reads HTTP(S) files through a read-ahead buffer: a background thread\n\
             * fetches the whole file while you read, and seeks into data that is\n\
             * already fetched return immediately.\n\
             * \n\
             * Basic usage:\n\
             * \n\
             *     agrim_file_t* file = agrim_open_url(\"https://example.com/data.bin\", \"r\");\n\
             *     if (!file) {\n\
             *         fprintf(stderr, \"Error: %s\\n\", agrim_last_error());\n\
             *         return 1;\n\
             *     }\n\
             *     \n\
             *     char buffer[1024];\n\
             *     ssize_t n = agrim_read(file, buffer, sizeof(buffer));\n\
             *     \n\
             *     agrim_file_close(file);\n\
             * \n\
             * Error reporting is thread-local.\n\
             * File handles should not be used from multiple threads simultaneously.\n\
             */",
        )
        .with_after_include(
            "#include <stdint.h>\n\
             #include <stddef.h>\n\
             \n\
             #ifdef _WIN32\n\
             typedef intptr_t ssize_t;\n\
             #else\n\
             #include <sys/types.h>\n\
             #endif\n\
             \n\
             #ifdef __cplusplus\n\
             extern \"C\" {\n\
             #endif",
        )
        .with_trailer(
            "#ifdef __cplusplus\n\
             }\n\
             #endif",
        )
        .generate()
        .expect("Unable to generate C bindings")
        .write_to_file(&output_file);

    println!("cargo:warning=Generated C header: {}", output_file.display());
}
