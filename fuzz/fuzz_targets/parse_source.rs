#![no_main]

use libfuzzer_sys::fuzz_target;
use regforge::parser::Parser;
use regforge::{Engine, ExecutionLimits};

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        let limits = ExecutionLimits::strict().with_max_steps(10_000);
        if let Ok(program) = Parser::with_limits(limits.clone()).parse(source) {
            let _ = Engine::with_limits(limits).run(&program);
        }
    }
});
