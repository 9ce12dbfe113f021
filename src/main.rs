use clap::Parser;

use geevm::vm::{Vm, VmSettings};

/// Runs a Java class's main method on the geevm interpreter.
///
/// The bootstrap archive for `java.*` classes is named by the
/// `RT_JAR_PATH` environment variable; `JDK17_PATH` points at the
/// platform's `java.base` root for system properties.
#[derive(Parser)]
#[command(name = "geevm-java", version)]
struct Args {
    /// The class whose `main(String[])` should run, in dotted or
    /// slash-separated form.
    main_class: String,

    /// Classpath entries (directories or jars) searched in order.
    #[arg(long = "classpath", short = 'c', default_value = ".")]
    class_path: Vec<String>,

    /// Run a collection after every allocation; slow, for GC debugging.
    #[arg(long)]
    gc_stress: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let settings = VmSettings {
        class_path: args.class_path,
        run_gc_after_every_allocation: args.gc_stress,
        ..VmSettings::default()
    };

    let mut vm = Vm::new(settings);
    std::process::exit(vm.run_main(&args.main_class));
}
