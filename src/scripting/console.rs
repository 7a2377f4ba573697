//! Script console
//!
//! `print`, `alert` and `console.*` write to `tracing` under the
//! `script.console` target.

use rquickjs::prelude::Rest;
use rquickjs::{Coerced, Ctx, Function, Object};

fn join(args: Rest<Coerced<String>>) -> String {
    args.0
        .into_iter()
        .map(|arg| arg.0)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let global = ctx.globals();

    // ==================== Console API ====================
    let console_obj = Object::new(ctx.clone())?;

    console_obj.set("log", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::info!(target: "script.console", "{}", join(args));
    })?)?;

    console_obj.set("info", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::info!(target: "script.console", "{}", join(args));
    })?)?;

    console_obj.set("debug", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::debug!(target: "script.console", "{}", join(args));
    })?)?;

    console_obj.set("warn", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::warn!(target: "script.console", "{}", join(args));
    })?)?;

    console_obj.set("error", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::error!(target: "script.console", "{}", join(args));
    })?)?;

    global.set("console", console_obj)?;

    // ==================== Globals ====================
    global.set("print", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::info!(target: "script.console", "{}", join(args));
    })?)?;

    global.set("alert", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
        tracing::warn!(target: "script.console", "{}", join(args));
    })?)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    #[test]
    fn test_console_accepts_any_values() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            install(&ctx).unwrap();
            let kind: String = ctx
                .eval("console.log('n', 1, {a: 1}, null); print(); alert(undefined); typeof console.debug")
                .unwrap();
            assert_eq!(kind, "function");
        });
    }
}
