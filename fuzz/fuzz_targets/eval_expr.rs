#![no_main]

use libfuzzer_sys::fuzz_target;
use surveyxp::{ExpressionEngine, SimpleQuestions, SimpleVars};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let mut vars = SimpleVars::new();
        vars.define("a", 1i64);
        vars.define("b", "text");
        let mut engine = ExpressionEngine::new(Box::new(vars), Box::new(SimpleQuestions::new()));
        let _ = engine.evaluate(s, false);
        let _ = engine.evaluate(s, true);
        let _ = engine.process(s);
    }
});
