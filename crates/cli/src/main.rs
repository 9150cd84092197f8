// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! XPU Bench CLI entry point.

fn main() {
    if let Err(e) = xpu_bench_cli::run() {
        xpu_bench_cli::output::print_error(&e);
        std::process::exit(1);
    }
}
