//! Basic example of the Trellis container.

use std::sync::Arc;

use trellis::prelude::*;

// === Define your types ===

trait Logger: Send + Sync {
    fn log(&self, msg: &str);
}

struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, msg: &str) {
        println!("[LOG] {msg}");
    }
}

#[derive(Default)]
struct Database {
    url: String,
}

impl Database {
    fn query(&self, sql: &str) -> String {
        format!("Results of `{sql}` from {}", self.url)
    }
}

struct UserRepository {
    db: Bean<Database>,
    logger: Bean<Arc<dyn Logger>>,
}

impl UserRepository {
    fn find_user(&self, id: u64) -> Result<String> {
        self.logger.get()?.log(&format!("Finding user {id}"));
        Ok(self.db.get()?.query(&format!("SELECT * FROM users WHERE id = {id}")))
    }
}

struct AuditProcessor;

impl BeanPostProcessor for AuditProcessor {
    fn after_initialization(&self, name: &str, bean: trellis::bean::RawBean) -> Result<Step> {
        println!("[AUDIT] bean '{name}' is ready");
        Ok(Step::Continue(bean))
    }
}

fn main() -> Result<()> {
    // Initialize tracing (logging)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("trellis_container=debug"))
        .init();

    let database = BeanClass::builder::<Database>()
        .with_default()
        .property("url", Dependency::on::<String>(), |db, value| {
            db.url = value.into_value()?;
            Ok(())
        })
        .init(|db| {
            println!("🔌 connecting to {}", db.url);
            Ok(())
        })
        .destroy(|db| println!("🔌 closing {}", db.url))
        .build();

    let repository = BeanClass::builder::<UserRepository>()
        .constructor(
            "new",
            [Dependency::on::<Database>(), Dependency::on::<Arc<dyn Logger>>()],
            |args| {
                Ok(UserRepository {
                    db: args.bean(0)?,
                    logger: args.bean(1)?,
                })
            },
        )
        .build();

    // Build the container
    let container = Container::builder()
        .post_processor(AuditProcessor)
        .definition(
            "logger",
            BeanDefinition::supplier(|_| Ok(Arc::new(ConsoleLogger) as Arc<dyn Logger>)),
        )
        // abstract parent carrying the shared connection settings
        .definition(
            "baseDatabase",
            BeanDefinition::of_class(database)
                .with_property("url", ValueSpec::value(String::from("postgres://localhost/app")))
                .with_abstract(true),
        )
        .definition("database", BeanDefinition::child_of("baseDatabase"))
        .definition("userRepository", BeanDefinition::of_class(repository))
        .build()?;

    container.register_alias("userRepository", "users")?;

    println!("✅ Container built successfully!");
    println!("{container:?}");

    container.refresh()?;

    let users: Arc<UserRepository> = container.get_bean_as("users")?;
    println!("👤 {}", users.find_user(42)?);

    container.destroy_singletons();
    println!("\n🎉 Everything works!");
    Ok(())
}
