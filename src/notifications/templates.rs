//! Email bodies for account, order and appointment events.

use super::OutgoingEmail;
use crate::db::{Appointment, Order};

/// Escape HTML special characters
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Wrap body markup in the shared branded layout
fn layout(heading: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{heading}</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, Arial, sans-serif; background-color: #f5f5f5; margin: 0; padding: 0; }}
        .container {{ max-width: 560px; margin: 0 auto; padding: 40px 20px; }}
        .card {{ background-color: #ffffff; border-radius: 8px; overflow: hidden; }}
        .header {{ background-color: #1f2937; color: #ffffff; padding: 24px; text-align: center; }}
        .header h1 {{ margin: 0; font-size: 22px; }}
        .content {{ padding: 24px; color: #374151; line-height: 1.6; }}
        .code {{ font-size: 28px; letter-spacing: 6px; font-weight: bold; text-align: center; margin: 24px 0; }}
        table.details td {{ padding: 4px 12px 4px 0; }}
        .footer {{ padding: 16px; text-align: center; color: #9ca3af; font-size: 12px; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="card">
            <div class="header"><h1>{heading}</h1></div>
            <div class="content">{body}</div>
            <div class="footer">SyberTailor - made to measure</div>
        </div>
    </div>
</body>
</html>"#,
        heading = html_escape(heading),
        body = body,
    )
}

fn money(amount: f64) -> String {
    format!("NGN {:.2}", amount)
}

fn order_details_html(order: &Order) -> String {
    format!(
        r#"<table class="details">
<tr><td>Order</td><td>{id}</td></tr>
<tr><td>Style</td><td>{style}</td></tr>
<tr><td>Material</td><td>{material}</td></tr>
<tr><td>Total</td><td>{total}</td></tr>
<tr><td>Status</td><td>{status}</td></tr>
<tr><td>Payment</td><td>{payment}</td></tr>
</table>"#,
        id = html_escape(order.short_id()),
        style = html_escape(&order.style.title),
        material = html_escape(&order.material.name),
        total = money(order.total_price),
        status = order.status.label(),
        payment = order.payment_status,
    )
}

fn order_details_text(order: &Order) -> String {
    format!(
        "Order: {}\nStyle: {}\nMaterial: {}\nTotal: {}\nStatus: {}\nPayment: {}",
        order.short_id(),
        order.style.title,
        order.material.name,
        money(order.total_price),
        order.status.label(),
        order.payment_status,
    )
}

pub fn verification_code(to: &str, name: &str, code: &str, ttl_minutes: i64) -> OutgoingEmail {
    let body = format!(
        "<p>Hi {name},</p><p>Use this code to verify your email address:</p>\
         <div class=\"code\">{code}</div><p>The code expires in {ttl_minutes} minutes.</p>",
        name = html_escape(name),
        code = html_escape(code),
    );
    OutgoingEmail {
        to: to.to_string(),
        subject: "Verify your email address".to_string(),
        html: layout("Verify your email", &body),
        text: format!(
            "Hi {},\n\nYour verification code is {}.\nIt expires in {} minutes.",
            name, code, ttl_minutes
        ),
    }
}

pub fn password_reset(to: &str, name: &str, link: &str, ttl_minutes: i64) -> OutgoingEmail {
    let body = format!(
        "<p>Hi {name},</p><p>We received a request to reset your password.</p>\
         <p><a href=\"{link}\">Reset your password</a></p>\
         <p>This link expires in {ttl_minutes} minutes. If you did not ask for it, ignore this email.</p>",
        name = html_escape(name),
        link = html_escape(link),
    );
    OutgoingEmail {
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        html: layout("Password reset", &body),
        text: format!(
            "Hi {},\n\nReset your password here:\n{}\n\nThis link expires in {} minutes.",
            name, link, ttl_minutes
        ),
    }
}

pub fn order_placed_customer(order: &Order) -> OutgoingEmail {
    let body = format!(
        "<p>Hi {name},</p><p>Thank you for your order. We will start as soon as payment is confirmed.</p>{details}",
        name = html_escape(&order.customer_name),
        details = order_details_html(order),
    );
    OutgoingEmail {
        to: order.customer_email.clone(),
        subject: format!("Order {} received", order.short_id()),
        html: layout("Order received", &body),
        text: format!(
            "Hi {},\n\nThank you for your order.\n\n{}",
            order.customer_name,
            order_details_text(order)
        ),
    }
}

pub fn order_placed_admin(to: &str, order: &Order) -> OutgoingEmail {
    let body = format!(
        "<p>A new order was placed by {name} ({email}).</p>{details}",
        name = html_escape(&order.customer_name),
        email = html_escape(&order.customer_email),
        details = order_details_html(order),
    );
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("New order {} from {}", order.short_id(), order.customer_name),
        html: layout("New order", &body),
        text: format!(
            "New order from {} <{}>\n\n{}",
            order.customer_name,
            order.customer_email,
            order_details_text(order)
        ),
    }
}

pub fn payment_receipt(order: &Order) -> OutgoingEmail {
    let delivery = order
        .expected_delivery_date
        .as_deref()
        .and_then(|d| d.get(..10))
        .unwrap_or("soon");
    let body = format!(
        "<p>Hi {name},</p><p>We received your payment of {total} (reference {reference}).</p>\
         <p>Your garment is now in progress. Expected delivery: {delivery}.</p>{details}",
        name = html_escape(&order.customer_name),
        total = money(order.total_price),
        reference = html_escape(order.payment_reference.as_deref().unwrap_or("-")),
        delivery = html_escape(delivery),
        details = order_details_html(order),
    );
    OutgoingEmail {
        to: order.customer_email.clone(),
        subject: format!("Payment received for order {}", order.short_id()),
        html: layout("Payment received", &body),
        text: format!(
            "Hi {},\n\nWe received your payment of {}.\nExpected delivery: {}.\n\n{}",
            order.customer_name,
            money(order.total_price),
            delivery,
            order_details_text(order)
        ),
    }
}

pub fn payment_received_admin(to: &str, order: &Order) -> OutgoingEmail {
    let body = format!(
        "<p>{name} paid for order {id}.</p>{details}",
        name = html_escape(&order.customer_name),
        id = html_escape(order.short_id()),
        details = order_details_html(order),
    );
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("Payment received: order {}", order.short_id()),
        html: layout("Payment received", &body),
        text: format!("{} paid.\n\n{}", order.customer_name, order_details_text(order)),
    }
}

pub fn order_updated(order: &Order, change: &str) -> OutgoingEmail {
    let body = format!(
        "<p>Hi {name},</p><p>{change}</p>{details}",
        name = html_escape(&order.customer_name),
        change = html_escape(change),
        details = order_details_html(order),
    );
    OutgoingEmail {
        to: order.customer_email.clone(),
        subject: format!("Update on order {}", order.short_id()),
        html: layout("Order update", &body),
        text: format!(
            "Hi {},\n\n{}\n\n{}",
            order.customer_name,
            change,
            order_details_text(order)
        ),
    }
}

pub fn delivery_reminder_admin(to: &str, order: &Order, days_before: i64) -> OutgoingEmail {
    let (subject, lead) = if days_before <= 1 {
        (
            format!("URGENT DELIVERY: Order {} due tomorrow", order.id),
            "This order is due for delivery tomorrow.".to_string(),
        )
    } else {
        (
            format!("DELIVERY REMINDER: Order {} due in {} days", order.id, days_before),
            format!("This order is due for delivery in {} days.", days_before),
        )
    };
    let body = format!(
        "<p>{lead}</p><p>Customer: {name} ({email})</p>{details}",
        lead = html_escape(&lead),
        name = html_escape(&order.customer_name),
        email = html_escape(&order.customer_email),
        details = order_details_html(order),
    );
    OutgoingEmail {
        to: to.to_string(),
        html: layout("Delivery reminder", &body),
        text: format!(
            "{}\nCustomer: {} <{}>\n\n{}",
            lead,
            order.customer_name,
            order.customer_email,
            order_details_text(order)
        ),
        subject,
    }
}

fn appointment_details_html(appointment: &Appointment) -> String {
    format!(
        r#"<table class="details">
<tr><td>Date</td><td>{date}</td></tr>
<tr><td>Time</td><td>{time}</td></tr>
<tr><td>Address</td><td>{address}</td></tr>
<tr><td>Phone</td><td>{phone}</td></tr>
</table>"#,
        date = html_escape(&appointment.date),
        time = html_escape(&appointment.time),
        address = html_escape(&appointment.address),
        phone = html_escape(&appointment.phone),
    )
}

pub fn appointment_confirmation(to: &str, appointment: &Appointment) -> OutgoingEmail {
    let body = format!(
        "<p>Hi {name},</p><p>Your in-person appointment is booked.</p>{details}",
        name = html_escape(&appointment.name),
        details = appointment_details_html(appointment),
    );
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("Appointment booked for {} at {}", appointment.date, appointment.time),
        html: layout("Appointment booked", &body),
        text: format!(
            "Hi {},\n\nYour appointment is booked for {} at {}.\nAddress: {}",
            appointment.name, appointment.date, appointment.time, appointment.address
        ),
    }
}

pub fn appointment_admin_alert(to: &str, appointment: &Appointment) -> OutgoingEmail {
    let body = format!(
        "<p>New in-person appointment from {name}.</p>{details}",
        name = html_escape(&appointment.name),
        details = appointment_details_html(appointment),
    );
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("New appointment: {} {}", appointment.date, appointment.time),
        html: layout("New appointment", &body),
        text: format!(
            "New appointment from {} ({}) on {} at {}.\nAddress: {}",
            appointment.name, appointment.phone, appointment.date, appointment.time, appointment.address
        ),
    }
}

pub fn appointment_reminder(to: &str, appointment: &Appointment) -> OutgoingEmail {
    let body = format!(
        "<p>Hi {name},</p><p>A reminder that we will see you today at {time}.</p>{details}",
        name = html_escape(&appointment.name),
        time = html_escape(&appointment.time),
        details = appointment_details_html(appointment),
    );
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("Reminder: your appointment today at {}", appointment.time),
        html: layout("Appointment reminder", &body),
        text: format!(
            "Hi {},\n\nA reminder that we will see you today at {}.\nAddress: {}",
            appointment.name, appointment.time, appointment.address
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MaterialSnapshot, OrderStatus, OrderType, PaymentStatus, StyleSnapshot};

    fn order() -> Order {
        Order {
            id: "0f3c2a9b-1111-2222-3333-444455556666".to_string(),
            user_id: Some("u1".to_string()),
            customer_name: "Ada <Lovelace>".to_string(),
            customer_email: "ada@example.com".to_string(),
            order_type: OrderType::Online,
            style: StyleSnapshot {
                title: "Kaftan".to_string(),
                price: 5000.0,
                yards_required: 2.0,
                image: None,
                style_id: None,
            },
            material: MaterialSnapshot {
                name: "Linen".to_string(),
                kind: None,
                price_per_yard: 1000.0,
                image: None,
                fabric_id: None,
            },
            measurement_id: None,
            notes: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            total_price: 7000.0,
            payment_reference: None,
            paid_at: None,
            expected_delivery_date: None,
            created_at: "2025-01-01T10:00:00Z".to_string(),
            updated_at: "2025-01-01T10:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("Tom & Jerry"), "Tom &amp; Jerry");
        assert_eq!(html_escape("\"quoted\""), "&quot;quoted&quot;");
    }

    #[test]
    fn test_order_placed_customer_escapes_name() {
        let email = order_placed_customer(&order());
        assert_eq!(email.to, "ada@example.com");
        assert!(email.subject.contains("0f3c2a9b"));
        assert!(email.html.contains("Ada &lt;Lovelace&gt;"));
        assert!(email.html.contains("NGN 7000.00"));
        assert!(email.text.contains("Ada <Lovelace>"));
        assert!(email.html.contains("<!DOCTYPE html>"));
    }

    #[test]
    fn test_delivery_reminder_wording() {
        let soon = delivery_reminder_admin("shop@example.com", &order(), 3);
        assert!(soon.subject.starts_with("DELIVERY REMINDER"));
        assert!(soon.subject.contains("3 days"));

        let tomorrow = delivery_reminder_admin("shop@example.com", &order(), 1);
        assert!(tomorrow.subject.starts_with("URGENT DELIVERY"));
    }

    #[test]
    fn test_verification_code_email() {
        let email = verification_code("ada@example.com", "Ada", "123456", 15);
        assert!(email.html.contains("123456"));
        assert!(email.text.contains("15 minutes"));
    }
}
