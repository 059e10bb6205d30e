use course_payments::config::{ASAAS_DEFAULT_FEES, MERCADOPAGO_DEFAULT_FEES};
use course_payments::domain::canonical::{BillingType, PaymentStatus};
use course_payments::domain::money::{apply_bps, compute_split, RevenueShare};
use course_payments::gateways::asaas::AsaasGateway;
use course_payments::gateways::mercadopago::MercadoPagoGateway;
use course_payments::gateways::PaymentGateway;

#[test]
fn fees_on_one_hundred_reais() {
    let fees = ASAAS_DEFAULT_FEES;
    assert_eq!(fees.fee_for(BillingType::Pix, 10_000).unwrap(), 99);
    assert_eq!(fees.fee_for(BillingType::Boleto, 10_000).unwrap(), 299);
    assert_eq!(fees.fee_for(BillingType::Card, 10_000).unwrap(), 348);
}

#[test]
fn two_hundred_pix_split_seventy_thirty() {
    let split = compute_split(20_000, BillingType::Pix, &ASAAS_DEFAULT_FEES, RevenueShare::default()).unwrap();
    assert_eq!(split.gateway_fee_minor, 198);
    assert_eq!(split.net_amount_minor, 19_802);
    assert_eq!(split.instructor_amount_minor, 13_861);
    assert_eq!(split.platform_amount_minor, 5_941);
}

#[test]
fn money_is_conserved_within_one_cent() {
    let shares = [
        RevenueShare::default(),
        RevenueShare::new(5000, 5000).unwrap(),
        RevenueShare::new(8500, 1500).unwrap(),
        RevenueShare::new(3333, 6667).unwrap(),
    ];
    for fees in [ASAAS_DEFAULT_FEES, MERCADOPAGO_DEFAULT_FEES] {
        for gross in (500..=250_000).step_by(997) {
            for discount_bps in [0u32, 500, 1000, 2500, 5000] {
                let charged = gross - apply_bps(gross, discount_bps);
                for billing in [BillingType::Pix, BillingType::Boleto, BillingType::Card] {
                    let fee = fees.fee_for(billing, charged).unwrap();
                    if fee >= charged {
                        continue;
                    }
                    for share in shares {
                        let s = compute_split(charged, billing, &fees, share).unwrap();
                        assert_eq!(s.gateway_fee_minor + s.net_amount_minor, charged);
                        let distributed = s.instructor_amount_minor + s.platform_amount_minor;
                        assert!(
                            (distributed - s.net_amount_minor).abs() <= 1,
                            "gross {} discount {} {:?}: {} vs net {}",
                            gross,
                            discount_bps,
                            billing,
                            distributed,
                            s.net_amount_minor
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn split_of_amount_below_fee_is_an_error() {
    assert!(compute_split(200, BillingType::Boleto, &ASAAS_DEFAULT_FEES, RevenueShare::default()).is_err());
}

#[test]
fn unknown_provider_status_is_failed() {
    let asaas = AsaasGateway {
        base_url: "http://127.0.0.1:1".to_string(),
        api_key: String::new(),
        webhook_token: None,
        fees: ASAAS_DEFAULT_FEES,
        client: reqwest::Client::new(),
    };
    let mp = MercadoPagoGateway {
        base_url: "http://127.0.0.1:1".to_string(),
        access_token: String::new(),
        webhook_secret: None,
        fees: MERCADOPAGO_DEFAULT_FEES,
        client: reqwest::Client::new(),
    };
    assert_eq!(asaas.normalize_status("SOMETHING_NEW"), PaymentStatus::Failed);
    assert_eq!(mp.normalize_status("something_new"), PaymentStatus::Failed);
    assert_eq!(asaas.normalize_status("RECEIVED"), PaymentStatus::Confirmed);
    assert_eq!(mp.normalize_status("approved"), PaymentStatus::Confirmed);
}
