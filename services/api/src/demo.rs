use crate::infra::seeded_store;
use chrono::{Local, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Args;
use exit_pass::error::AppError;
use exit_pass::workflows::exit_pass::{
    AuditActor, ExitPassService, FixedClock, PassCategory, PassDraft, PassRequest,
    PassServiceError, RecordingAuditLog, RecordingNotifier, Recipient, StaffId, StudentId,
};
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Date the walkthrough runs on (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Skip the notification and audit listing at the end.
    #[arg(long)]
    pub(crate) quiet: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { today, quiet } = args;
    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN);
    let now = Utc.from_utc_datetime(&today.and_time(noon));

    let store = Arc::new(seeded_store());
    let notifier = Arc::new(RecordingNotifier::default());
    let audit = Arc::new(RecordingAuditLog::default());
    let service = ExitPassService::with_clock(
        store,
        notifier.clone(),
        audit.clone(),
        Arc::new(FixedClock(now)),
    );

    let dsa = service.staff(&StaffId("staff-dsa".to_string()))?;
    let cso = service.staff(&StaffId("staff-cso".to_string()))?;
    let assistant = service.staff(&StaffId("staff-acso".to_string()))?;
    let porter = service.staff(&StaffId("staff-porter".to_string()))?;
    let security = service.staff(&StaffId("staff-security".to_string()))?;
    let amaka = service.student(&StudentId("stu-1001".to_string()))?;
    let tunde = service.student(&StudentId("stu-1002".to_string()))?;
    let halima = service.student(&StudentId("stu-1003".to_string()))?;

    println!("Exit pass demo ({today})");

    println!("\n{} requests a short pass", amaka.full_name());
    let first = service.submit(
        PassDraft {
            notify_guardian: true,
            ..draft(PassCategory::Short, today, "Bank visit", "Town centre")
        },
        &amaka,
    )?;
    show(&first);
    show(&service.approve_as_dsa(&first.id, &dsa, Some("Cleared".to_string()))?);
    show(&service.approve_as_cso(&first.id, &cso, None)?);
    show(&service.check_out(&first.id, &porter)?);
    show(&service.check_in(&first.id, &security)?);

    println!("\n{} requests a second short pass", amaka.full_name());
    let second = service.submit(
        draft(PassCategory::Short, today, "Medical Appointment", "Teaching hospital"),
        &amaka,
    )?;
    service.approve_as_dsa(&second.id, &dsa, None)?;
    show(&service.approve_as_cso(&second.id, &assistant, None)?);

    println!("\n{} tries a third short pass", amaka.full_name());
    match service.submit(
        draft(PassCategory::Short, today, "Shopping", "Market"),
        &amaka,
    ) {
        Err(PassServiceError::QuotaExceeded(refusal)) => println!(
            "  refused: {} (used {} of {} in {})",
            refusal.reason, refusal.used, refusal.limit, refusal.month
        ),
        Ok(pass) => println!("  unexpectedly accepted {}", pass.id),
        Err(err) => return Err(err.into()),
    }

    println!("\n{} requests a long pass", tunde.full_name());
    let long = service.submit(
        draft(PassCategory::Long, today, "Family Emergency", "Ibadan"),
        &tunde,
    )?;
    show(&long);
    show(&service.reject(&long.id, &dsa, "Incomplete documentation")?);

    println!("\n{} has special privilege", halima.full_name());
    for _ in 0..2 {
        let pass = service.submit(
            draft(PassCategory::Long, today, "Clinical rotation", "Abuja"),
            &halima,
        )?;
        service.approve_as_dsa(&pass.id, &dsa, None)?;
        service.approve_as_cso(&pass.id, &cso, None)?;
    }
    let summary = service.quota_summary(&halima.id)?;
    println!(
        "  {} long passes granted in {}; remaining: unlimited",
        summary.usage.long_count, summary.month
    );

    let summary = service.quota_summary(&amaka.id)?;
    println!(
        "\nAllowance for {} in {}: {} short / {} long remaining",
        amaka.full_name(),
        summary.month,
        summary.short_remaining.unwrap_or_default(),
        summary.long_remaining.unwrap_or_default()
    );

    if quiet {
        return Ok(());
    }

    println!("\nNotifications dispatched:");
    for notification in notifier.delivered() {
        let recipient = match notification.recipient {
            Recipient::Student { id } => format!("student {id}"),
            Recipient::Staff { id } => format!("staff {id}"),
            Recipient::Guardian { name, .. } => format!("guardian {name}"),
        };
        println!("  - [{recipient}] {}", notification.title);
    }

    println!("\nAudit trail:");
    for entry in audit.entries() {
        let actor = match entry.actor {
            AuditActor::Student(id) => format!("student {id}"),
            AuditActor::Staff(id) => format!("staff {id}"),
        };
        let metadata: Vec<String> = entry
            .metadata
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        println!(
            "  - {} {} by {} {}",
            entry.action,
            entry.entity_id,
            actor,
            metadata.join(" ")
        );
    }

    Ok(())
}

fn show(pass: &PassRequest) {
    println!(
        "  {} [{}] {} pass to {}",
        pass.id,
        pass.status().label(),
        pass.category().label(),
        pass.details.destination
    );
}

fn draft(category: PassCategory, today: NaiveDate, reason: &str, destination: &str) -> PassDraft {
    let departure_time = NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN);
    let (return_date, return_time) = match category {
        PassCategory::Short => (None, None),
        PassCategory::Long => (
            today.succ_opt(),
            NaiveTime::from_hms_opt(18, 0, 0),
        ),
    };
    PassDraft {
        category,
        reason: reason.to_string(),
        destination: destination.to_string(),
        departure_date: today,
        departure_time,
        return_date,
        return_time,
        emergency_contact_name: "Hall warden".to_string(),
        emergency_contact_phone: "+2348090000000".to_string(),
        notes: None,
        notify_guardian: false,
    }
}
