use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=REINDEXER_LIB_DIR");
    println!("cargo:rerun-if-env-changed=REINDEXER_LIBS");

    // Only the `linked` feature needs the native libraries.
    if env::var_os("CARGO_FEATURE_LINKED").is_none() {
        return;
    }

    // Optional override for dev/CI:
    // - REINDEXER_LIB_DIR: dir containing libreindexer + libreindexer_server
    // - REINDEXER_LIBS: comma separated link names, in link order
    if let Ok(dir) = env::var("REINDEXER_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }

    let libs = env::var("REINDEXER_LIBS")
        .unwrap_or_else(|_| "reindexer_server,reindexer,leveldb,snappy".to_string());
    for lib in libs.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        println!("cargo:rustc-link-lib={lib}");
    }

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    match target_os.as_str() {
        "macos" => println!("cargo:rustc-link-lib=dylib=c++"),
        "windows" => {}
        _ => println!("cargo:rustc-link-lib=dylib=stdc++"),
    }
}
